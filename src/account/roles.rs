/// Seeded role reference data
use crate::{
    db::models::Role,
    error::{IdentityError, IdentityResult},
};
use sqlx::{Executor, Sqlite};

pub const USER: &str = "user";
pub const SUPERUSER: &str = "superuser";

/// Roles a caller may assign through the public API
pub fn is_public(role_id: &str) -> bool {
    role_id != SUPERUSER
}

/// Look up a role by id
pub async fn find_role<'e, E>(executor: E, role_id: &str) -> IdentityResult<Role>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE id = ?1")
        .bind(role_id)
        .fetch_optional(executor)
        .await?
        .ok_or(IdentityError::RoleNotFound)
}
