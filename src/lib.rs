pub mod audio;
pub mod common;
pub mod configs;
pub mod events;
pub mod gateway;
pub mod http;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod supervisor;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;
