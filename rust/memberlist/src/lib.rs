pub mod config;
pub mod reader;

pub use reader::{
    from_config, FileMemberlistReader, Member, Memberlist, MemberlistReader,
    MemberlistReaderError, MemberlistSnapshot, StaticMemberlistReader,
};
