pub mod fix_spacing;
pub mod import;
pub mod init;
pub mod status;
