mod identity;

pub use identity::{USER_ID_HEADER, USER_ROLE_HEADER};
