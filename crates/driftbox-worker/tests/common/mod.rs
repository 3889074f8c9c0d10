pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{
    fast_config, hash_of, seed_local_file, seed_remote_file, Harness, WORKSPACE,
};
#[allow(unused_imports)]
pub use mocks::{MockProvider, MockTransport, RecordingReporter, MOCK_PROVIDER_ID};
