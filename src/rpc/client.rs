//! Esplora endpoints
//!
//! One method per remote endpoint. Each takes a chain identifier, validates
//! its arguments before anything is queued, issues exactly one HTTP request
//! and returns a typed value.

use bitcoin::Txid;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use super::http::{HttpClient, HttpRequest};
use super::shaping::{shape_response, ResponseShape};
use super::throttle::RequestThrottle;
use crate::config::WalletConfig;
use crate::error::{WalletError, WalletResult};
use crate::network::BitcoinNetwork;
use crate::types::{decimal, AddressStats, TransactionInfo, UnspentOutput};

const MAX_ADDRESS_LEN: usize = 100;

pub struct BitcoinRpc {
    http: Arc<dyn HttpClient>,
    throttle: RequestThrottle,
    mainnet_url: Url,
    testnet_url: Url,
}

impl BitcoinRpc {
    pub fn new(config: &WalletConfig, http: Arc<dyn HttpClient>) -> WalletResult<Self> {
        Ok(Self {
            http,
            throttle: RequestThrottle::new(config.max_requests_per_host),
            mainnet_url: parse_base_url(config.esplora_url(BitcoinNetwork::Mainnet))?,
            testnet_url: parse_base_url(config.esplora_url(BitcoinNetwork::Testnet))?,
        })
    }

    /// Current chain tip height
    pub async fn get_chain_height(&self, chain_id: &str) -> WalletResult<u32> {
        let url = self.endpoint(chain_id, "blocks/tip/height")?;
        let values: Vec<String> = self.get_json(url, ResponseShape::WrapScalar).await?;
        match values.as_slice() {
            [height] => decimal::parse_u32(height)
                .ok_or_else(|| WalletError::parsing(format!("invalid chain height '{}'", height))),
            _ => Err(WalletError::parsing("expected a single chain height")),
        }
    }

    /// Fee rate estimates in sat/vB keyed by confirmation target (blocks)
    pub async fn get_fee_estimates(&self, chain_id: &str) -> WalletResult<BTreeMap<u32, f64>> {
        let url = self.endpoint(chain_id, "fee-estimates")?;
        let raw: BTreeMap<String, f64> = self.get_json(url, ResponseShape::Json).await?;

        raw.into_iter()
            .map(|(target, rate)| {
                let target = decimal::parse_u32(&target).ok_or_else(|| {
                    WalletError::parsing(format!("invalid confirmation target '{}'", target))
                })?;
                if !rate.is_finite() || rate < 0.0 {
                    return Err(WalletError::parsing(format!("invalid fee rate {}", rate)));
                }
                Ok((target, rate))
            })
            .collect()
    }

    pub async fn get_transaction(&self, chain_id: &str, txid: &str) -> WalletResult<TransactionInfo> {
        let txid = parse_txid(txid)?;
        let url = self.endpoint(chain_id, &format!("tx/{}", txid))?;
        self.get_json(url, ResponseShape::AmountsAsStrings).await
    }

    /// Raw consensus bytes of a transaction
    pub async fn get_transaction_raw(&self, chain_id: &str, txid: &str) -> WalletResult<Vec<u8>> {
        let txid = parse_txid(txid)?;
        let url = self.endpoint(chain_id, &format!("tx/{}/hex", txid))?;
        let body = self.execute(HttpRequest::get(url)).await?;

        let text = body_text(&body)?;
        if text.is_empty() {
            return Err(WalletError::parsing("empty raw transaction"));
        }
        Ok(hex::decode(text)?)
    }

    pub async fn get_address_stats(&self, chain_id: &str, address: &str) -> WalletResult<AddressStats> {
        validate_address(address)?;
        let url = self.endpoint(chain_id, &format!("address/{}", address))?;
        self.get_json(url, ResponseShape::AmountsAsStrings).await
    }

    pub async fn get_utxo_list(&self, chain_id: &str, address: &str) -> WalletResult<Vec<UnspentOutput>> {
        validate_address(address)?;
        let url = self.endpoint(chain_id, &format!("address/{}/utxo", address))?;
        self.get_json(url, ResponseShape::AmountsAsStrings).await
    }

    /// Broadcast a signed transaction, returning the txid reported by the remote
    pub async fn post_transaction(&self, chain_id: &str, raw_tx: &[u8]) -> WalletResult<String> {
        if raw_tx.is_empty() {
            return Err(WalletError::invalid_argument("empty transaction"));
        }
        let url = self.endpoint(chain_id, "tx")?;
        let body = self.execute(HttpRequest::post(url, hex::encode(raw_tx))).await?;

        let txid = body_text(&body)?;
        Txid::from_str(txid)
            .map_err(|e| WalletError::parsing(format!("invalid txid in broadcast response: {}", e)))?;
        Ok(txid.to_string())
    }

    fn endpoint(&self, chain_id: &str, path: &str) -> WalletResult<Url> {
        let base = match BitcoinNetwork::from_chain_id(chain_id)? {
            BitcoinNetwork::Mainnet => &self.mainnet_url,
            BitcoinNetwork::Testnet => &self.testnet_url,
        };
        base.join(path)
            .map_err(|e| WalletError::internal(format!("Failed to build URL for {}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, shape: ResponseShape) -> WalletResult<T> {
        let body = self.execute(HttpRequest::get(url)).await?;
        let value = shape_response(&body, shape)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Queue behind the host throttle, then issue the request
    async fn execute(&self, request: HttpRequest) -> WalletResult<Vec<u8>> {
        let host = host_key(&request.url);
        let _permit = self.throttle.acquire(&host).await?;

        log::debug!("{:?} {}", request.method, request.url);
        let url = request.url.clone();
        let response = self.http.send(request).await?;

        if !response.is_success() {
            log::warn!("⚠️  {} returned HTTP {}", url, response.status);
            return Err(WalletError::UnexpectedHttpResult(response.status));
        }
        Ok(response.body)
    }
}

fn parse_base_url(raw: &str) -> WalletResult<Url> {
    // Url::join replaces the last path segment unless the base ends in '/'
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized)
        .map_err(|e| WalletError::invalid_argument(format!("invalid Esplora URL '{}': {}", raw, e)))
}

fn host_key(url: &Url) -> String {
    format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}

fn parse_txid(txid: &str) -> WalletResult<Txid> {
    Txid::from_str(txid).map_err(|e| WalletError::invalid_argument(format!("invalid txid '{}': {}", txid, e)))
}

/// Addresses are interpolated into URL paths, so only bech32/base58
/// characters are accepted
fn validate_address(address: &str) -> WalletResult<()> {
    if address.is_empty()
        || address.len() > MAX_ADDRESS_LEN
        || !address.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(WalletError::invalid_argument(format!("invalid address '{}'", address)));
    }
    Ok(())
}

fn body_text(body: &[u8]) -> WalletResult<&str> {
    std::str::from_utf8(body)
        .map(str::trim)
        .map_err(|e| WalletError::parsing(format!("response is not UTF-8: {}", e)))
}
