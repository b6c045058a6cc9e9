macro_rules! test_roundtrip {
    ($t:ty, $name:ident) => {
        #[allow(unused_imports)]
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig{fork: false, ..Default::default()})]
            #[test]
            fn $name(orig: $t) {
                #[allow(unused_imports)]
                use std::io::Cursor;

                let mut data = Vec::<u8>::new();
                orig.put(&mut data);
                let l = data.len() as u64;

                let mut buf = Cursor::new(data);
                let restored = <$t>::read(&mut buf).unwrap();
                assert_eq!(orig, restored);

                assert_eq!(buf.position(), l);
            }
        }
    };
}

pub(crate) use test_roundtrip;
