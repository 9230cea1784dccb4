// test-support: shared harness for exercising the gateway's socket surface
// in integration tests, without pulling tokio-tungstenite into every crate
// that needs to open a connection to it.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;
