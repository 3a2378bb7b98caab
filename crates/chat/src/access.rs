// Classroom access oracle.
//
// Facilitators own classrooms; learners are enrolled in them. Both tables
// belong to the main API service, so this module only reads them. The
// in-memory variant backs tests and DB-less development with explicit
// grants.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use lectern_common::types::Principal;

#[derive(Clone)]
pub enum ClassroomAccessStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashSet<(Uuid, Uuid)>>>),
}

impl ClassroomAccessStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashSet::new())))
    }

    /// May `principal` participate in `classroom_id`? Facilitators must
    /// own the classroom; learners must be enrolled.
    pub async fn has_access(&self, principal: &Principal, classroom_id: Uuid) -> Result<bool> {
        match self {
            Self::Postgres(pool) => {
                let allowed = if principal.role.is_facilitator() {
                    sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS(\
                           SELECT 1 FROM classrooms \
                           WHERE id = $1 AND facilitator_id = $2\
                         )",
                    )
                    .bind(classroom_id)
                    .bind(principal.id)
                    .fetch_one(pool)
                    .await
                    .context("failed to check classroom ownership")?
                } else {
                    sqlx::query_scalar::<_, bool>(
                        "SELECT EXISTS(\
                           SELECT 1 FROM enrollments \
                           WHERE classroom_id = $1 AND learner_id = $2\
                         )",
                    )
                    .bind(classroom_id)
                    .bind(principal.id)
                    .fetch_one(pool)
                    .await
                    .context("failed to check classroom enrollment")?
                };
                Ok(allowed)
            }
            Self::Memory(grants) => {
                Ok(grants.read().await.contains(&(classroom_id, principal.id)))
            }
        }
    }

    /// Record an access grant on the in-memory variant. No-op against
    /// Postgres, where the main API service owns these tables.
    pub async fn grant(&self, classroom_id: Uuid, user_id: Uuid) {
        if let Self::Memory(grants) = self {
            grants.write().await.insert((classroom_id, user_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use lectern_common::types::{Principal, Role};
    use uuid::Uuid;

    use super::ClassroomAccessStore;

    fn principal(role: Role) -> Principal {
        Principal { id: Uuid::new_v4(), name: "Grace".to_string(), role, email: None }
    }

    #[tokio::test]
    async fn denies_without_a_grant() {
        let store = ClassroomAccessStore::in_memory();
        let learner = principal(Role::Learner);

        let allowed =
            store.has_access(&learner, Uuid::new_v4()).await.expect("check should succeed");
        assert!(!allowed);
    }

    #[tokio::test]
    async fn grant_is_scoped_to_one_classroom() {
        let store = ClassroomAccessStore::in_memory();
        let learner = principal(Role::Learner);
        let enrolled = Uuid::new_v4();
        let other = Uuid::new_v4();

        store.grant(enrolled, learner.id).await;

        assert!(store.has_access(&learner, enrolled).await.expect("check should succeed"));
        assert!(!store.has_access(&learner, other).await.expect("check should succeed"));
    }

    #[tokio::test]
    async fn grants_are_per_user() {
        let store = ClassroomAccessStore::in_memory();
        let grace = principal(Role::Learner);
        let ada = principal(Role::Facilitator);
        let classroom_id = Uuid::new_v4();

        store.grant(classroom_id, grace.id).await;

        assert!(store.has_access(&grace, classroom_id).await.expect("check should succeed"));
        assert!(!store.has_access(&ada, classroom_id).await.expect("check should succeed"));
    }
}
