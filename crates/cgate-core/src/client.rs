use std::time::Duration;

use wreq::Client;
use wreq_util::Emulation;

/// The edge filters on TLS fingerprints; every outbound request presents the
/// Chrome 131 ClientHello.
const BROWSER: Emulation = Emulation::Chrome131;

/// Client for the streaming chat endpoint. No overall deadline (streams run
/// as long as the model generates); the per-call context bounds it instead.
pub fn chat_client() -> Result<Client, wreq::Error> {
    Client::builder()
        .emulation(BROWSER)
        .connect_timeout(Duration::from_secs(10))
        .cert_verification(false)
        .build()
}

/// Client for the challenge refresh round-trips (script download and the
/// de-obfuscator call).
pub fn challenge_client() -> Result<Client, wreq::Error> {
    Client::builder()
        .emulation(BROWSER)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
}
