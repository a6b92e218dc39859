use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::{MenuError, OperatorId};

/// Auth collaborator contract: may this operator mutate menu data?
/// Everything else about identity lives outside this crate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MutationPolicy: Send + Sync {
    async fn can_mutate_menu(&self, operator: OperatorId) -> Result<bool, MenuError>;
}

/// Config-backed policy: an explicit allowlist, or everyone when the list
/// is empty.
pub struct StaticPolicy {
    allowed: Vec<OperatorId>,
}

impl StaticPolicy {
    pub fn new(allowed: Vec<OperatorId>) -> Self {
        Self { allowed }
    }

    pub fn allow_all() -> Self {
        Self { allowed: Vec::new() }
    }
}

#[async_trait]
impl MutationPolicy for StaticPolicy {
    async fn can_mutate_menu(&self, operator: OperatorId) -> Result<bool, MenuError> {
        Ok(self.allowed.is_empty() || self.allowed.contains(&operator))
    }
}

/// Enforcement wrapper used by every gateway write path.
#[derive(Clone)]
pub struct MenuAuthorization {
    policy: Arc<dyn MutationPolicy>,
}

impl MenuAuthorization {
    pub fn new(policy: Arc<dyn MutationPolicy>) -> Self {
        Self { policy }
    }

    /// Refuse before any storage is touched.
    pub async fn require_mutate(&self, operator: OperatorId) -> Result<(), MenuError> {
        if self.policy.can_mutate_menu(operator).await? {
            debug!("Operator {} authorized for menu mutation", operator);
            Ok(())
        } else {
            warn!("Operator {} denied menu mutation", operator);
            Err(MenuError::Unauthorized(operator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_allowlist_admits_everyone() {
        let auth = MenuAuthorization::new(Arc::new(StaticPolicy::allow_all()));
        assert!(auth.require_mutate(42).await.is_ok());
    }

    #[tokio::test]
    async fn allowlist_is_enforced() {
        let auth = MenuAuthorization::new(Arc::new(StaticPolicy::new(vec![1, 2])));
        assert!(auth.require_mutate(2).await.is_ok());
        assert!(matches!(
            auth.require_mutate(3).await,
            Err(MenuError::Unauthorized(3))
        ));
    }

    #[tokio::test]
    async fn policy_failures_propagate_instead_of_admitting() {
        let mut policy = MockMutationPolicy::new();
        policy
            .expect_can_mutate_menu()
            .returning(|_| Err(MenuError::Transient("auth backend timeout".to_string())));

        let auth = MenuAuthorization::new(Arc::new(policy));
        assert!(matches!(
            auth.require_mutate(1).await,
            Err(MenuError::Transient(_))
        ));
    }
}
