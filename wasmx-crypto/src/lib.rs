pub mod address;
pub mod error;
pub mod hash;
pub mod keys;
pub mod merkle;
pub mod secp;
