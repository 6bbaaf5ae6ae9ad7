//! Capability strings
//!
//! A task's `type` is matched against these exactly.

pub const CODE_GENERATE: &str = "code.generate";
pub const CODE_REVIEW: &str = "code.review";
pub const CODE_ANALYZE: &str = "code.analyze";
pub const ARCHITECTURE_REVIEW: &str = "architecture.review";
pub const TEST_GENERATE: &str = "test.generate";
pub const TEST_EXECUTE: &str = "test.execute";
pub const DEPLOYMENT_PREPARE: &str = "deployment.prepare";
pub const DEPLOYMENT_EXECUTE: &str = "deployment.execute";
pub const INFRASTRUCTURE_PROVISION: &str = "infrastructure.provision";
pub const MONITORING_CONFIGURE: &str = "monitoring.configure";

pub const DEVELOPER: &[&str] = &[CODE_GENERATE, CODE_REVIEW];
pub const ANALYZER: &[&str] = &[CODE_ANALYZE];
pub const ARCHITECT: &[&str] = &[ARCHITECTURE_REVIEW];
pub const TESTER: &[&str] = &[TEST_GENERATE, TEST_EXECUTE];
pub const DEVOPS: &[&str] = &[
    DEPLOYMENT_PREPARE,
    DEPLOYMENT_EXECUTE,
    INFRASTRUCTURE_PROVISION,
    MONITORING_CONFIGURE,
];
