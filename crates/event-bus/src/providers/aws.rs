//! AWS SQS transport using the SQS query API over HTTP.
//!
//! Requests are plain `reqwest` calls with parameters in the query string,
//! signed with AWS Signature Version 4 when credentials are configured.
//! Responses are XML and parsed with `quick-xml`. Talking HTTP directly keeps
//! the transport testable against a mock server and lets it target
//! SQS-compatible brokers (ElasticMQ, LocalStack) through an endpoint override.
//!
//! ## Queue identity
//!
//! A queue identity that is already an `http(s)://` URL is used as the
//! `QueueUrl` directly. Anything else is treated as a queue name, resolved
//! once with `GetQueueUrl` and cached.
//!
//! ## Message bodies
//!
//! Bodies are sent verbatim. SQS accepts any XML-safe unicode text, which
//! covers the JSON payloads this crate is used with.

use crate::error::{BatchEntryFailure, ConfigurationError, TransportError};
use crate::message::{
    BatchOutcome, EnqueueRequest, FailedEntry, MessageId, QueueName, ReceiptHandle,
    ReceivedMessage, Timestamp,
};
use crate::provider::{AwsSqsConfig, ProviderType};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Longest long-poll SQS accepts
const MAX_WAIT_SECONDS: u64 = 20;

/// Longest visibility timeout SQS accepts (12 hours)
const MAX_VISIBILITY_SECONDS: u64 = 43_200;

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a request and return the headers to attach
    ///
    /// `canonical_query` must already be URI-encoded and sorted.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        canonical_query: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>, TransportError> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";
        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp)?;
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        Ok(vec![
            ("authorization", authorization),
            ("x-amz-date", amz_date),
            ("host", host.to_string()),
        ])
    }

    /// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
    fn calculate_signature(
        &self,
        string_to_sign: &str,
        date_stamp: &str,
    ) -> Result<String, TransportError> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes())?;

        Ok(hex::encode(signature))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| {
        TransportError::Configuration(ConfigurationError::Invalid {
            message: format!("signing key rejected: {}", e),
        })
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encode and sort query parameters the way SigV4 canonicalizes them
fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// SQS Transport
// ============================================================================

/// Transport for AWS SQS and SQS-compatible brokers
///
/// Safe to share across tasks. The queue URL cache is behind a `RwLock`.
pub struct SqsTransport {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    region: String,
    endpoint: String,
    host: String,
    queue_urls: Arc<RwLock<HashMap<QueueName, String>>>,
}

impl SqsTransport {
    /// Create a transport from validated configuration
    ///
    /// Without credentials requests are sent unsigned, which SQS-compatible
    /// local brokers accept and AWS rejects with an authentication error.
    pub fn new(config: &AwsSqsConfig) -> Result<Self, TransportError> {
        if config.region.is_empty() {
            return Err(TransportError::Configuration(ConfigurationError::Missing {
                key: "provider.region".to_string(),
            }));
        }

        let signer = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key.clone(),
                secret_key.clone(),
                config.region.clone(),
            )),
            _ => None,
        };

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region))
            .trim_end_matches('/')
            .to_string();

        let url = reqwest::Url::parse(&endpoint).map_err(|e| {
            TransportError::Configuration(ConfigurationError::Invalid {
                message: format!("invalid SQS endpoint '{}': {}", endpoint, e),
            })
        })?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(TransportError::Configuration(ConfigurationError::Invalid {
                    message: format!("SQS endpoint '{}' has no host", endpoint),
                }))
            }
        };

        // Long polls hold the connection for up to 20 seconds
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(MAX_WAIT_SECONDS + 10))
            .build()
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer,
            region: config.region.clone(),
            endpoint,
            host,
            queue_urls: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve a queue identity to its URL, with caching
    async fn resolve_queue_url(&self, queue: &QueueName) -> Result<String, TransportError> {
        if queue.is_url() {
            return Ok(queue.as_str().to_string());
        }

        {
            let cache = self.queue_urls.read().await;
            if let Some(url) = cache.get(queue) {
                return Ok(url.clone());
            }
        }

        let params = vec![
            ("Action".to_string(), "GetQueueUrl".to_string()),
            ("QueueName".to_string(), queue.as_str().to_string()),
        ];
        let response = self.make_request(params).await?;
        let url = first_element_text(&response, b"QueueUrl")?.ok_or_else(|| {
            TransportError::Serialization {
                message: "QueueUrl not found in response".to_string(),
            }
        })?;

        debug!(queue = %queue, queue_url = %url, "Resolved queue URL");
        self.queue_urls
            .write()
            .await
            .insert(queue.clone(), url.clone());

        Ok(url)
    }

    /// Send a query API request and return the response body
    async fn make_request(
        &self,
        mut params: Vec<(String, String)>,
    ) -> Result<String, TransportError> {
        params.push(("Version".to_string(), API_VERSION.to_string()));
        let query = canonical_query_string(&params);
        let url = format!("{}/?{}", self.endpoint, query);

        let mut request = self.http_client.post(&url);
        if let Some(signer) = &self.signer {
            let headers = signer.sign_request("POST", &self.host, "/", &query, "", &Utc::now())?;
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Request timeout: {}", e)
            } else if e.is_connect() {
                format!("Connection failed: {}", e)
            } else {
                format!("HTTP request failed: {}", e)
            };
            TransportError::ConnectionFailed { message }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(parse_error_response(&body, status.as_u16()));
        }

        Ok(body)
    }

    fn check_size(body: &str) -> Result<(), TransportError> {
        let max_size = ProviderType::AwsSqs.max_message_size();
        if body.len() > max_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                max_size,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsTransport")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn enqueue(
        &self,
        queue: &QueueName,
        request: &EnqueueRequest,
    ) -> Result<MessageId, TransportError> {
        Self::check_size(&request.body)?;
        let queue_url = self.resolve_queue_url(queue).await?;

        let mut params = vec![
            ("Action".to_string(), "SendMessage".to_string()),
            ("QueueUrl".to_string(), queue_url),
            ("MessageBody".to_string(), request.body.clone()),
        ];
        if let Some(group) = &request.message_group_id {
            params.push(("MessageGroupId".to_string(), group.clone()));
        }
        if let Some(dedup) = &request.deduplication_id {
            params.push(("MessageDeduplicationId".to_string(), dedup.clone()));
        }

        let response = self.make_request(params).await?;
        let message_id = first_element_text(&response, b"MessageId")?.ok_or_else(|| {
            TransportError::Serialization {
                message: "MessageId not found in response".to_string(),
            }
        })?;

        parse_message_id(&message_id)
    }

    async fn enqueue_batch(
        &self,
        queue: &QueueName,
        requests: &[EnqueueRequest],
    ) -> Result<BatchOutcome, TransportError> {
        if requests.is_empty() {
            return Ok(BatchOutcome::default());
        }
        if requests.len() > self.max_batch_size() {
            return Err(TransportError::InvalidRequest {
                message: format!(
                    "Batch size {} exceeds SQS limit of {}",
                    requests.len(),
                    self.max_batch_size()
                ),
            });
        }
        for request in requests {
            Self::check_size(&request.body)?;
        }

        let queue_url = self.resolve_queue_url(queue).await?;
        let mut params = vec![
            ("Action".to_string(), "SendMessageBatch".to_string()),
            ("QueueUrl".to_string(), queue_url),
        ];

        for (idx, request) in requests.iter().enumerate() {
            let prefix = format!("SendMessageBatchRequestEntry.{}", idx + 1);
            params.push((format!("{}.Id", prefix), idx.to_string()));
            params.push((format!("{}.MessageBody", prefix), request.body.clone()));
            if let Some(group) = &request.message_group_id {
                params.push((format!("{}.MessageGroupId", prefix), group.clone()));
            }
            if let Some(dedup) = &request.deduplication_id {
                params.push((format!("{}.MessageDeduplicationId", prefix), dedup.clone()));
            }
        }

        let response = self.make_request(params).await?;
        let entries = parse_batch_response(&response)?;

        let mut outcome = BatchOutcome::default();
        let mut answered = vec![false; requests.len()];
        for entry in entries {
            let index = match entry.id.parse::<usize>() {
                Ok(index) if index < requests.len() => index,
                _ => {
                    warn!(entry_id = %entry.id, "Ignoring batch result with unknown entry id");
                    continue;
                }
            };
            answered[index] = true;

            match entry.result {
                BatchEntryResult::Succeeded(message_id) => {
                    outcome.succeeded.push(parse_message_id(&message_id)?)
                }
                BatchEntryResult::Failed(failure) => outcome.failed.push(FailedEntry {
                    request: requests[index].clone(),
                    failure,
                }),
            }
        }

        // An entry the broker did not answer for cannot be assumed delivered
        for (index, _) in answered.iter().enumerate().filter(|(_, seen)| !**seen) {
            outcome.failed.push(FailedEntry {
                request: requests[index].clone(),
                failure: BatchEntryFailure {
                    code: "MissingResult".to_string(),
                    reason: "no result returned for entry".to_string(),
                    sender_fault: false,
                },
            });
        }

        Ok(outcome)
    }

    async fn receive_up_to(
        &self,
        queue: &QueueName,
        max_messages: u32,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let queue_url = self.resolve_queue_url(queue).await?;
        let visibility_seconds = visibility_timeout.as_secs().min(MAX_VISIBILITY_SECONDS);

        let params = vec![
            ("Action".to_string(), "ReceiveMessage".to_string()),
            ("QueueUrl".to_string(), queue_url),
            (
                "MaxNumberOfMessages".to_string(),
                max_messages.clamp(1, self.max_receive_count()).to_string(),
            ),
            (
                "WaitTimeSeconds".to_string(),
                wait.as_secs().min(MAX_WAIT_SECONDS).to_string(),
            ),
            (
                "VisibilityTimeout".to_string(),
                visibility_seconds.to_string(),
            ),
            ("AttributeName.1".to_string(), "All".to_string()),
        ];

        let response = self.make_request(params).await?;
        let expires_at = Timestamp::from_datetime(
            Utc::now() + chrono::Duration::seconds(visibility_seconds as i64),
        );

        parse_receive_response(&response, queue, &expires_at)
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        let queue_url = self.resolve_queue_url(receipt.queue()).await?;
        let params = vec![
            ("Action".to_string(), "DeleteMessage".to_string()),
            ("QueueUrl".to_string(), queue_url),
            ("ReceiptHandle".to_string(), receipt.handle().to_string()),
        ];

        self.make_request(params).await?;
        Ok(())
    }

    async fn purge(&self, queue: &QueueName) -> Result<(), TransportError> {
        let queue_url = self.resolve_queue_url(queue).await?;
        let params = vec![
            ("Action".to_string(), "PurgeQueue".to_string()),
            ("QueueUrl".to_string(), queue_url),
        ];

        self.make_request(params).await?;
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AwsSqs
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

fn xml_error(e: impl fmt::Display) -> TransportError {
    TransportError::Serialization {
        message: format!("XML parsing error: {}", e),
    }
}

fn parse_message_id(raw: &str) -> Result<MessageId, TransportError> {
    MessageId::from_str(raw).map_err(|e| TransportError::Serialization {
        message: format!("invalid MessageId '{}': {}", raw, e),
    })
}

/// Text content of the first element with the given name
fn first_element_text(xml: &str, element: &[u8]) -> Result<Option<String>, TransportError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == element => inside = true,
            Ok(Event::Text(e)) if inside => {
                return e.unescape().map(|s| Some(s.into_owned())).map_err(xml_error);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == element => inside = false,
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Map an SQS `ErrorResponse` to a transport error
fn parse_error_response(xml: &str, status_code: u16) -> TransportError {
    let code = first_element_text(xml, b"Code")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown".to_string());
    let message = first_element_text(xml, b"Message")
        .ok()
        .flatten()
        .unwrap_or_else(|| format!("HTTP status {}", status_code));

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            TransportError::QueueNotFound {
                queue_name: message,
            }
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "MissingAuthenticationToken"
        | "AccessDenied" => TransportError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => {
            TransportError::InvalidReceipt { receipt: message }
        }
        "InvalidParameterValue"
        | "MissingParameter"
        | "InvalidParameterCombination"
        | "InvalidMessageContents"
        | "AWS.SimpleQueueService.TooManyEntriesInBatchRequest"
        | "AWS.SimpleQueueService.BatchEntryIdsNotDistinct"
        | "AWS.SimpleQueueService.EmptyBatchRequest" => TransportError::InvalidRequest {
            message: format!("{}: {}", code, message),
        },
        _ if status_code == 401 || status_code == 403 => TransportError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        _ => TransportError::Service { code, message },
    }
}

struct BatchResultEntry {
    id: String,
    result: BatchEntryResult,
}

enum BatchEntryResult {
    Succeeded(String),
    Failed(BatchEntryFailure),
}

/// Parse a `SendMessageBatchResponse` into per-entry results
fn parse_batch_response(xml: &str) -> Result<Vec<BatchResultEntry>, TransportError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    // Some(true) inside a success entry, Some(false) inside an error entry
    let mut entry_kind: Option<bool> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut values: HashMap<Vec<u8>, String> = HashMap::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"SendMessageBatchResultEntry" => {
                    entry_kind = Some(true);
                    values.clear();
                }
                b"BatchResultErrorEntry" => {
                    entry_kind = Some(false);
                    values.clear();
                }
                name if entry_kind.is_some() => field = Some(name.to_vec()),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(name) = field.take() {
                    values.insert(name, e.unescape().map_err(xml_error)?.into_owned());
                }
            }
            Ok(Event::End(ref e)) => match (e.name().as_ref(), entry_kind) {
                (b"SendMessageBatchResultEntry", Some(true)) => {
                    entry_kind = None;
                    entries.push(BatchResultEntry {
                        id: values.remove(b"Id".as_slice()).unwrap_or_default(),
                        result: BatchEntryResult::Succeeded(
                            values.remove(b"MessageId".as_slice()).unwrap_or_default(),
                        ),
                    });
                }
                (b"BatchResultErrorEntry", Some(false)) => {
                    entry_kind = None;
                    entries.push(BatchResultEntry {
                        id: values.remove(b"Id".as_slice()).unwrap_or_default(),
                        result: BatchEntryResult::Failed(BatchEntryFailure {
                            code: values
                                .remove(b"Code".as_slice())
                                .unwrap_or_else(|| "Unknown".to_string()),
                            reason: values.remove(b"Message".as_slice()).unwrap_or_default(),
                            sender_fault: values
                                .remove(b"SenderFault".as_slice())
                                .map_or(false, |v| v.eq_ignore_ascii_case("true")),
                        }),
                    });
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Parse a `ReceiveMessageResponse`
fn parse_receive_response(
    xml: &str,
    queue: &QueueName,
    expires_at: &Timestamp,
) -> Result<Vec<ReceivedMessage>, TransportError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut messages = Vec::new();
    let mut in_message = false;
    let mut in_attribute = false;
    let mut field: Option<Vec<u8>> = None;

    let mut message_id: Option<String> = None;
    let mut receipt_handle: Option<String> = None;
    let mut body: Option<String> = None;
    let mut attribute_name: Option<String> = None;
    let mut group_id: Option<String> = None;
    let mut delivery_count: u32 = 1;

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" => {
                    in_message = true;
                    message_id = None;
                    receipt_handle = None;
                    body = None;
                    group_id = None;
                    delivery_count = 1;
                }
                b"Attribute" if in_message => {
                    in_attribute = true;
                    attribute_name = None;
                }
                name if in_message => field = Some(name.to_vec()),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(name) = field.take() {
                    let text = e.unescape().map_err(xml_error)?.into_owned();

                    match (in_attribute, name.as_slice()) {
                        (true, b"Name") => attribute_name = Some(text),
                        (true, b"Value") => match attribute_name.as_deref() {
                            Some("MessageGroupId") => group_id = Some(text),
                            Some("ApproximateReceiveCount") => {
                                delivery_count = text.parse().unwrap_or(1)
                            }
                            _ => {}
                        },
                        (false, b"MessageId") => message_id = Some(text),
                        (false, b"ReceiptHandle") => receipt_handle = Some(text),
                        (false, b"Body") => body = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Attribute" => in_attribute = false,
                b"Message" if in_message => {
                    in_message = false;

                    match (message_id.take(), receipt_handle.take()) {
                        (Some(id), Some(handle)) => messages.push(ReceivedMessage {
                            message_id: parse_message_id(&id)?,
                            // An empty <Body/> produces no text event
                            body: body.take().unwrap_or_default(),
                            receipt_handle: ReceiptHandle::new(
                                handle,
                                queue.clone(),
                                expires_at.clone(),
                                ProviderType::AwsSqs,
                            ),
                            message_group_id: group_id.take(),
                            delivery_count,
                            received_at: Timestamp::now(),
                        }),
                        _ => {
                            warn!(queue = %queue, "Skipping received message without id or receipt")
                        }
                    }
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}
