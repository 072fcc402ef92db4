#[path = "../../../sendgate-smtp/tests/support/mock_server.rs"]
pub mod mock_server;
