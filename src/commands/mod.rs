pub mod control;
pub mod decode;
pub mod discover;
pub mod encrypt;
pub mod energy;
pub mod list;
pub mod scene;
pub mod serve;
