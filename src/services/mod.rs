pub mod retry;
pub mod sequencer;
pub mod session;
pub mod staging;
pub mod storage;
pub mod uploader;
