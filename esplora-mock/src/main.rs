/// Esplora mock binary
///
/// Serves a `MockChain` over HTTP for manual wallet runs. The chain comes
/// from a JSON fixture when `ESPLORA_MOCK_FIXTURE` is set, otherwise it
/// starts empty at `ESPLORA_MOCK_TIP_HEIGHT`.
use anyhow::{Context, Result};
use esplora_mock::{run_server, MockChain};
use std::env;
use std::path::PathBuf;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

struct MockSettings {
    host: String,
    port: u16,
    fixture: Option<PathBuf>,
    tip_height: u64,
}

impl MockSettings {
    fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = match env::var("SERVER_PORT") {
            Ok(raw) => raw.parse().with_context(|| format!("Invalid SERVER_PORT '{}'", raw))?,
            Err(_) => DEFAULT_PORT,
        };
        let tip_height = match env::var("ESPLORA_MOCK_TIP_HEIGHT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid ESPLORA_MOCK_TIP_HEIGHT '{}'", raw))?,
            Err(_) => 0,
        };

        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port,
            fixture: env::var("ESPLORA_MOCK_FIXTURE").ok().map(PathBuf::from),
            tip_height,
        })
    }

    fn load_chain(&self) -> Result<MockChain> {
        let Some(path) = &self.fixture else {
            return Ok(MockChain::new(self.tip_height));
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        let chain: MockChain = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid fixture {}", path.display()))?;
        log::info!(
            "📂 Loaded fixture {}: {} address(es), {} transaction(s)",
            path.display(),
            chain.addresses.len(),
            chain.transactions.len()
        );
        Ok(chain)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = MockSettings::from_env()?;
    let chain = settings.load_chain()?;
    log::info!("Mock chain tip at height {}", chain.tip_height);

    run_server(chain.into_state(), settings.host, settings.port)
        .await
        .context("Esplora mock server failed")
}
