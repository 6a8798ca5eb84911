pub mod aac;
pub mod amf0;
pub mod chunk;
pub mod flv;
pub mod handshake;
pub mod message;
