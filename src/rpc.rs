//! JSON-RPC dispatcher for the enclave boundary
//!
//! This module is the untrusted host's view of the enclave. Every method maps
//! onto one [`Enclave`] boundary call, and calls are serialized through a
//! single lock so the core never sees two at once. Method names use the "enc"
//! namespace prefix; byte parameters are hex, with or without `0x`.
//!
//! ## Supported Methods
//!
//! ### Datasets
//! - `enc_installValues` `{blob}`: installs a sealed value set
//! - `enc_installVectors` `{blob}`: installs a sealed vector set
//!
//! ### Queries
//! - `enc_checkValue` `{value}`: membership result and code
//! - `enc_checkValueEncrypted` `{value}`: membership as one AES-CTR block
//! - `enc_maxSimilarity` `{vector}` or `{blob}`: max cosine similarity
//!
//! ### Key Material
//! - `enc_installCipherKey` `{material}`: `key || counter`
//! - `enc_updateCounter` `{counter}`: next result counter
//! - `enc_decryptPayload` `{blob, expected_len}`: decrypts a test-data blob
//!
//! ### Instrumentation and Lifecycle
//! - `enc_accessCount`, `enc_timing`, `enc_resetTiming`
//! - `enc_status`: store states and whether a key is installed
//! - `enc_cleanup`: wipes all protected state
//!
//! A rejected boundary call comes back as an error whose code is
//! [`BoundaryStatus::code`] and whose message is only the coarse kind.

use crate::enclave::Enclave;
use crate::error::{BoundaryStatus, EnclaveError, Result};
use crate::similarity::{is_valid_similarity, SIMILARITY_UNAVAILABLE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// JSON-RPC request structure
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC error structure
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// RPC error codes
const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// Parameters carrying one sealed blob
#[derive(Debug, Deserialize)]
pub struct BlobParams {
    /// Hex-encoded blob; absent means a null buffer
    #[serde(default)]
    pub blob: Option<String>,
}

/// Parameters for the membership methods
#[derive(Debug, Deserialize)]
pub struct ValueParams {
    pub value: i32,
}

/// Parameters for enc_maxSimilarity
#[derive(Debug, Deserialize)]
pub struct SimilarityParams {
    /// Raw query vector
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    /// Hex-encoded sealed query blob, used when `vector` is absent
    #[serde(default)]
    pub blob: Option<String>,
}

/// Parameters for enc_decryptPayload
#[derive(Debug, Deserialize)]
pub struct DecryptParams {
    #[serde(default)]
    pub blob: Option<String>,
    pub expected_len: usize,
}

/// Parameters for enc_installCipherKey
#[derive(Debug, Deserialize)]
pub struct KeyParams {
    /// Hex-encoded `key[16] || counter[16]`
    #[serde(default)]
    pub material: Option<String>,
}

/// Parameters for enc_updateCounter
#[derive(Debug, Deserialize)]
pub struct CounterParams {
    #[serde(default)]
    pub counter: Option<String>,
}

/// Why a method produced no result
#[derive(Debug)]
enum CallError {
    /// The enclave rejected the call
    Boundary(BoundaryStatus),
    /// The request itself was unusable
    Request(EnclaveError),
}

impl From<BoundaryStatus> for CallError {
    fn from(status: BoundaryStatus) -> Self {
        CallError::Boundary(status)
    }
}

impl From<EnclaveError> for CallError {
    fn from(err: EnclaveError) -> Self {
        CallError::Request(err)
    }
}

type CallResult = std::result::Result<serde_json::Value, CallError>;

/// RPC handler for the enclave
#[derive(Clone)]
pub struct RpcHandler {
    enclave: Arc<Mutex<Enclave>>,
}

impl RpcHandler {
    pub fn new(enclave: Enclave) -> Self {
        Self {
            enclave: Arc::new(Mutex::new(enclave)),
        }
    }

    /// Shared handle to the enclave, for host-side provisioning
    pub fn enclave(&self) -> Arc<Mutex<Enclave>> {
        Arc::clone(&self.enclave)
    }

    /// Handles an incoming JSON-RPC request
    pub async fn handle(&self, request_body: &[u8]) -> Vec<u8> {
        let response = match serde_json::from_slice::<RpcRequest>(request_body) {
            Ok(request) => self.process_request(request).await,
            Err(e) => error_response(serde_json::Value::Null, PARSE_ERROR, format!("Parse error: {}", e)),
        };

        serde_json::to_vec(&response).unwrap_or_else(|_| {
            br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#
                .to_vec()
        })
    }

    /// Processes a parsed RPC request
    async fn process_request(&self, request: RpcRequest) -> RpcResponse {
        debug!(method = %request.method, "Processing RPC request");

        if request.jsonrpc != "2.0" {
            return error_response(
                request.id,
                INVALID_REQUEST,
                "Invalid JSON-RPC version".to_string(),
            );
        }

        let mut enclave = self.enclave.lock().await;
        let params = request.params;
        let result = match request.method.as_str() {
            "enc_installValues" => handle_install_values(&mut enclave, params),
            "enc_installVectors" => handle_install_vectors(&mut enclave, params),
            "enc_checkValue" => handle_check_value(&mut enclave, params),
            "enc_checkValueEncrypted" => handle_check_value_encrypted(&mut enclave, params),
            "enc_maxSimilarity" => handle_max_similarity(&mut enclave, params),
            "enc_decryptPayload" => handle_decrypt_payload(&mut enclave, params),
            "enc_installCipherKey" => handle_install_cipher_key(&mut enclave, params),
            "enc_updateCounter" => handle_update_counter(&mut enclave, params),
            "enc_accessCount" => Ok(serde_json::json!(enclave.access_count())),
            "enc_timing" => serde_json::to_value(enclave.timing())
                .map_err(|e| CallError::Request(EnclaveError::Serialization(e))),
            "enc_resetTiming" => {
                enclave.reset_timing();
                Ok(serde_json::Value::Null)
            }
            "enc_status" => Ok(serde_json::json!({
                "values": enclave.values_state(),
                "vectors": enclave.vectors_state(),
                "cipher_key": enclave.has_cipher_key(),
            })),
            "enc_cleanup" => {
                enclave.cleanup();
                Ok(serde_json::Value::Null)
            }
            _ => {
                return error_response(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                )
            }
        };
        drop(enclave);

        match result {
            Ok(value) => RpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(value),
                error: None,
                id: request.id,
            },
            Err(CallError::Boundary(status)) => {
                error_response(request.id, status.code(), status.as_str().to_string())
            }
            Err(CallError::Request(e)) => error_response(request.id, INVALID_PARAMS, e.to_string()),
        }
    }
}

fn error_response(id: serde_json::Value, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(RpcError { code, message }),
        id,
    }
}

/// Handles "enc_installValues"
fn handle_install_values(enclave: &mut Enclave, params: Option<serde_json::Value>) -> CallResult {
    let params: BlobParams = parse_params(params)?;
    let blob = decode_optional_hex("blob", params.blob.as_deref())?;
    enclave.install_values(blob.as_deref())?;
    Ok(serde_json::json!({ "installed": true }))
}

/// Handles "enc_installVectors"
fn handle_install_vectors(enclave: &mut Enclave, params: Option<serde_json::Value>) -> CallResult {
    let params: BlobParams = parse_params(params)?;
    let blob = decode_optional_hex("blob", params.blob.as_deref())?;
    enclave.install_vectors(blob.as_deref())?;
    Ok(serde_json::json!({ "installed": true }))
}

/// Handles "enc_checkValue" - result name plus numeric code
fn handle_check_value(enclave: &mut Enclave, params: Option<serde_json::Value>) -> CallResult {
    let params: ValueParams = parse_params(params)?;
    let membership = enclave.check_value(params.value);
    Ok(serde_json::json!({
        "result": membership,
        "code": membership.code(),
    }))
}

/// Handles "enc_checkValueEncrypted" - returns the hex ciphertext block
fn handle_check_value_encrypted(
    enclave: &mut Enclave,
    params: Option<serde_json::Value>,
) -> CallResult {
    let params: ValueParams = parse_params(params)?;
    let block = enclave.check_value_encrypted(params.value)?;
    Ok(serde_json::Value::String(format!("0x{}", hex::encode(block))))
}

/// Handles "enc_maxSimilarity"
fn handle_max_similarity(enclave: &mut Enclave, params: Option<serde_json::Value>) -> CallResult {
    let params: SimilarityParams = parse_params(params)?;
    let score = match (params.vector, params.blob) {
        (Some(vector), _) => enclave.max_similarity(Some(vector.as_slice())),
        (None, blob) => {
            let blob = decode_optional_hex("blob", blob.as_deref())?;
            enclave.max_similarity_sealed(blob.as_deref())
        }
    };
    if !is_valid_similarity(score) {
        debug!(kind = rejected_similarity_kind(score), "Similarity rejected");
    }
    Ok(serde_json::json!({
        "similarity": score,
        "valid": is_valid_similarity(score),
    }))
}

/// Coarse name for a score outside `[-1, 1]`, logged instead of the score
fn rejected_similarity_kind(score: f32) -> &'static str {
    if score == SIMILARITY_UNAVAILABLE {
        "unavailable"
    } else {
        "out_of_range"
    }
}

/// Handles "enc_decryptPayload" - returns the hex plaintext
fn handle_decrypt_payload(enclave: &mut Enclave, params: Option<serde_json::Value>) -> CallResult {
    let params: DecryptParams = parse_params(params)?;
    let blob = decode_optional_hex("blob", params.blob.as_deref())?;
    let plaintext = enclave.decrypt_payload(blob.as_deref(), params.expected_len)?;
    Ok(serde_json::Value::String(format!("0x{}", hex::encode(plaintext))))
}

/// Handles "enc_installCipherKey"
fn handle_install_cipher_key(
    enclave: &mut Enclave,
    params: Option<serde_json::Value>,
) -> CallResult {
    let params: KeyParams = parse_params(params)?;
    let material = decode_optional_hex("material", params.material.as_deref())?
        .map(zeroize::Zeroizing::new);
    enclave.install_cipher_key(material.as_ref().map(|m| m.as_slice()))?;
    Ok(serde_json::Value::Null)
}

/// Handles "enc_updateCounter"
fn handle_update_counter(enclave: &mut Enclave, params: Option<serde_json::Value>) -> CallResult {
    let params: CounterParams = parse_params(params)?;
    let counter = decode_optional_hex("counter", params.counter.as_deref())?;
    enclave.update_counter(counter.as_deref())?;
    Ok(serde_json::Value::Null)
}

/// Decodes an optional hex field, `0x` prefix allowed
fn decode_optional_hex(field: &str, value: Option<&str>) -> Result<Option<Vec<u8>>> {
    value
        .map(|s| {
            let s = s.strip_prefix("0x").unwrap_or(s);
            hex::decode(s).map_err(|e| EnclaveError::Rpc(format!("Invalid hex {}: {}", field, e)))
        })
        .transpose()
}

/// Helper to parse RPC params
fn parse_params<T: serde::de::DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T> {
    params
        .and_then(|p| {
            if p.is_array() {
                p.as_array().and_then(|arr| arr.first().cloned())
            } else {
                Some(p)
            }
        })
        .ok_or_else(|| EnclaveError::Rpc("Missing params".to_string()))
        .and_then(|p| {
            serde_json::from_value(p)
                .map_err(|e| EnclaveError::Rpc(format!("Invalid params: {}", e)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher;
    use crate::format::VECTOR_DIM;
    use crate::sealer;

    const MATERIAL_HEX: &str =
        "0x000102030405060708090a0b0c0d0e0f00000000000000000000000000000001";

    fn create_handler() -> RpcHandler {
        RpcHandler::new(Enclave::new())
    }

    async fn call(handler: &RpcHandler, body: serde_json::Value) -> RpcResponse {
        let bytes = serde_json::to_vec(&body).unwrap();
        let response = handler.handle(&bytes).await;
        serde_json::from_slice(&response).unwrap()
    }

    fn request(method: &str, params: serde_json::Value) -> serde_json::Value {
        serde_json::json!({"jsonrpc": "2.0", "method": method, "params": [params], "id": 1})
    }

    #[tokio::test]
    async fn test_install_and_check_value() {
        let handler = create_handler();
        let blob = format!("0x{}", hex::encode(sealer::seal_values(&[5, 3, 3, 8, 1]).unwrap()));

        let parsed = call(&handler, request("enc_installValues", serde_json::json!({"blob": blob}))).await;
        assert!(parsed.error.is_none());

        let parsed = call(&handler, request("enc_checkValue", serde_json::json!({"value": 3}))).await;
        let result = parsed.result.unwrap();
        assert_eq!(result["result"], "match");
        assert_eq!(result["code"], 1);

        let parsed = call(&handler, request("enc_checkValue", serde_json::json!({"value": 9}))).await;
        assert_eq!(parsed.result.unwrap()["result"], "no_match");
    }

    #[tokio::test]
    async fn test_check_before_install() {
        let handler = create_handler();
        let parsed = call(&handler, request("enc_checkValue", serde_json::json!({"value": 1}))).await;
        assert_eq!(parsed.result.unwrap()["code"], -1);
    }

    #[tokio::test]
    async fn test_missing_blob_is_null_buffer() {
        let handler = create_handler();
        let parsed = call(&handler, request("enc_installValues", serde_json::json!({}))).await;
        let error = parsed.error.unwrap();
        assert_eq!(error.code, BoundaryStatus::InvalidParameter.code());
        assert_eq!(error.message, "invalid_parameter");
    }

    #[tokio::test]
    async fn test_bad_version_reports_only_kind() {
        let handler = create_handler();
        let mut blob = sealer::seal_values(&[1, 2]).unwrap();
        blob[0] = 2;
        let parsed = call(
            &handler,
            request("enc_installValues", serde_json::json!({"blob": hex::encode(blob)})),
        )
        .await;
        let error = parsed.error.unwrap();
        assert_eq!(error.code, BoundaryStatus::InvalidVersion.code());
        assert_eq!(error.message, "invalid_version");
    }

    #[tokio::test]
    async fn test_encrypted_check_roundtrip() {
        let handler = create_handler();
        let blob = hex::encode(sealer::seal_values(&[42]).unwrap());
        call(&handler, request("enc_installValues", serde_json::json!({"blob": blob}))).await;
        let parsed = call(
            &handler,
            request("enc_installCipherKey", serde_json::json!({"material": MATERIAL_HEX})),
        )
        .await;
        assert!(parsed.error.is_none());

        let parsed = call(&handler, request("enc_checkValueEncrypted", serde_json::json!({"value": 42}))).await;
        let hex_block = parsed.result.unwrap();
        let block = hex::decode(hex_block.as_str().unwrap().trim_start_matches("0x")).unwrap();

        let material = hex::decode(MATERIAL_HEX.trim_start_matches("0x")).unwrap();
        let material = cipher::CipherMaterial::from_bytes(&material).unwrap();
        let plain = cipher::decrypt(&block, material.key(), material.counter()).unwrap();
        assert_eq!(plain[0], 1);
    }

    #[tokio::test]
    async fn test_max_similarity_vector_and_blob() {
        let handler = create_handler();
        let mut unit = [0f32; VECTOR_DIM];
        unit[10] = 2.0;
        let blob = hex::encode(sealer::seal_vectors(&[unit]).unwrap());
        call(&handler, request("enc_installVectors", serde_json::json!({"blob": blob}))).await;

        let parsed = call(
            &handler,
            request("enc_maxSimilarity", serde_json::json!({"vector": unit.to_vec()})),
        )
        .await;
        let result = parsed.result.unwrap();
        assert!((result["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-5);
        assert_eq!(result["valid"], true);

        let query = hex::encode(sealer::seal_query(&unit));
        let parsed = call(&handler, request("enc_maxSimilarity", serde_json::json!({"blob": query}))).await;
        assert!((parsed.result.unwrap()["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-5);

        let parsed = call(&handler, request("enc_maxSimilarity", serde_json::json!({"vector": [1.0, 2.0]}))).await;
        let result = parsed.result.unwrap();
        assert_eq!(result["similarity"], -2.0);
        assert_eq!(result["valid"], false);
    }

    #[tokio::test]
    async fn test_decrypt_payload() {
        let handler = create_handler();
        call(
            &handler,
            request("enc_installCipherKey", serde_json::json!({"material": MATERIAL_HEX})),
        )
        .await;

        let key: [u8; 16] = core::array::from_fn(|i| i as u8);
        let fresh = cipher::CipherMaterial::new(key, [0x55; 16]);
        let blob = sealer::seal_encrypted_values(&[3, 1, 2], &fresh).unwrap();
        let parsed = call(
            &handler,
            request(
                "enc_decryptPayload",
                serde_json::json!({"blob": hex::encode(&blob), "expected_len": blob.len() - 16}),
            ),
        )
        .await;
        let plaintext = parsed.result.unwrap();
        let expected = format!("0x{}", hex::encode(sealer::seal_raw_values(&[3, 1, 2]).unwrap()));
        assert_eq!(plaintext.as_str().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_status_timing_and_cleanup() {
        let handler = create_handler();
        let blob = hex::encode(sealer::seal_values(&[1, 2, 3]).unwrap());
        call(&handler, request("enc_installValues", serde_json::json!({"blob": blob}))).await;
        call(&handler, request("enc_checkValue", serde_json::json!({"value": 2}))).await;

        let parsed = call(&handler, serde_json::json!({"jsonrpc": "2.0", "method": "enc_accessCount", "id": 2})).await;
        assert!(parsed.result.unwrap().as_u64().unwrap() > 0);

        let parsed = call(&handler, serde_json::json!({"jsonrpc": "2.0", "method": "enc_timing", "id": 3})).await;
        assert!(parsed.result.unwrap().get("total_us").is_some());

        call(&handler, serde_json::json!({"jsonrpc": "2.0", "method": "enc_cleanup", "id": 4})).await;
        let parsed = call(&handler, serde_json::json!({"jsonrpc": "2.0", "method": "enc_status", "id": 5})).await;
        let status = parsed.result.unwrap();
        assert_eq!(status["values"], "empty");
        assert_eq!(status["cipher_key"], false);
    }

    #[tokio::test]
    async fn test_invalid_hex() {
        let handler = create_handler();
        let parsed = call(&handler, request("enc_installValues", serde_json::json!({"blob": "zz"}))).await;
        assert_eq!(parsed.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let handler = create_handler();
        let request = br#"{"jsonrpc":"2.0","method":"unknown","id":1}"#;
        let response = handler.handle(request).await;
        let parsed: RpcResponse = serde_json::from_slice(&response).unwrap();
        assert!(parsed.error.is_some());
        assert_eq!(parsed.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let handler = create_handler();
        let response = handler.handle(b"{not json").await;
        let parsed: RpcResponse = serde_json::from_slice(&response).unwrap();
        assert_eq!(parsed.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn test_rejected_similarity_kind() {
        assert_eq!(rejected_similarity_kind(SIMILARITY_UNAVAILABLE), "unavailable");
        assert_eq!(rejected_similarity_kind(1.5), "out_of_range");
        assert_eq!(rejected_similarity_kind(f32::NAN), "out_of_range");
    }

    #[test]
    fn test_parse_params() {
        // Test with object
        let params = Some(serde_json::json!({"value": 7}));
        let parsed: ValueParams = parse_params(params).unwrap();
        assert_eq!(parsed.value, 7);

        // Test with array (common in JSON-RPC)
        let params = Some(serde_json::json!([{"value": -7}]));
        let parsed: ValueParams = parse_params(params).unwrap();
        assert_eq!(parsed.value, -7);
    }
}
