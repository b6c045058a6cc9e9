//! CommandType to tag request types.
//!
//! The request header's `status` field carries the command verb on the way
//! to the server and a result code on the way back.

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum CommandType {
    Null,
    Get,
    PutSafe,
    PutASafe,
    GetAcq,
    Unknown(i32),
}

impl From<i32> for CommandType {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Null,
            1 => Self::Get,
            5 => Self::PutSafe,
            6 => Self::PutASafe,
            7 => Self::GetAcq,
            _ => Self::Unknown(code),
        }
    }
}

impl From<CommandType> for i32 {
    fn from(cmd: CommandType) -> Self {
        match cmd {
            CommandType::Null => 0,
            CommandType::Get => 1,
            CommandType::PutSafe => 5,
            CommandType::PutASafe => 6,
            CommandType::GetAcq => 7,
            CommandType::Unknown(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_roundtrip_int32(code: i32) {
            let cmd = CommandType::from(code);
            let code2 = i32::from(cmd);
            assert_eq!(code, code2);
        }

        #[test]
        fn test_roundtrip_command(cmd: CommandType) {
            let cmd = match cmd {
                // Ensure command is actually unknown
                CommandType::Unknown(x) => CommandType::from(x),
                _ => cmd,
            };

            let code = i32::from(cmd);
            let cmd2 = CommandType::from(code);
            assert_eq!(cmd, cmd2);
        }
    }
}
