pub mod init;
pub mod inspect;
pub mod simulate;
pub mod sync;
pub mod validate;
