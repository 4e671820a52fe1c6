//! Common test utilities for fluenta-billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;

use fluenta_billing_core::{Subscription, SubscriptionTier, UserId};
use fluenta_billing_service::{create_router, AppState, ServiceConfig};
use fluenta_billing_store::{MemoryStore, Store};

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Direct store access for seeding and assertions.
    pub store: Arc<MemoryStore>,
    /// A test user id.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            ..ServiceConfig::default()
        };

        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            test_user_id: UserId::generate(),
        }
    }

    /// Seed a subscription directly in the store and return its user id.
    pub fn seed_subscription(&self, tier: SubscriptionTier) -> UserId {
        let user_id = UserId::generate();
        self.store
            .put_subscription(&Subscription::new(user_id, tier))
            .expect("Failed to seed subscription");
        user_id
    }

    /// Seed a subscription with an explicit balance.
    pub fn seed_subscription_with_credits(
        &self,
        tier: SubscriptionTier,
        credits: i64,
    ) -> UserId {
        let user_id = UserId::generate();
        let mut sub = Subscription::new(user_id, tier);
        sub.credits_remaining = credits;
        sub.credits_total = credits;
        self.store
            .put_subscription(&sub)
            .expect("Failed to seed subscription");
        user_id
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
