pub mod password;
pub mod permissions;
pub mod token;

pub use token::{Claims, TokenIssuer};
