#[cfg(test)]
pub mod memory;
pub mod query;
pub mod repo;
pub mod repo_types;
pub mod validation;

pub use query::UserQuery;
pub use repo::{PgUserStore, SaveOptions, StoreError, UserStore};
pub use repo_types::{password_change_stamp, NewUser, Role, User};
