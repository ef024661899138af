use crate::{domain::models::Role, infrastructure::auth::AuthenticatedUser};

use self::errors::ServiceError;

pub mod advances;
pub mod directory;
pub mod errors;
pub mod expenses;
pub mod invoices;
pub mod notes;
pub mod orders;
pub mod payroll;
pub mod tickets;
pub mod users;
pub mod webhooks;

pub(crate) fn ensure_role(user: &AuthenticatedUser, allowed: &[Role]) -> Result<(), ServiceError> {
    if allowed.iter().any(|r| r == &user.role) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden)
    }
}
