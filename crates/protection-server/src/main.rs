use base64::Engine;
use infoprotect::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// --- Struct Definitions ---
#[derive(Deserialize, Serialize, Clone, Debug)]
struct RpcRequest {
    jsonrpc: String,
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize, Debug)]
struct RpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize, Debug)]
struct RpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct ProtectParams {
    owner: String,
    data: String,
    #[serde(default)]
    users: Vec<UserRights>,
    template_id: Option<String>,
    #[serde(default)]
    json_format: bool,
    #[serde(default)]
    allow_offline_access: bool,
}

#[derive(Deserialize, Debug)]
struct UnprotectParams {
    user: String,
    publishing_license: String,
    ciphertext: String,
    #[serde(default)]
    offline_only: bool,
}

#[derive(Deserialize, Debug)]
struct AccessCheckParams {
    user: String,
    publishing_license: String,
    right: String,
}

#[derive(Deserialize, Debug)]
struct LicenseInfoParams {
    publishing_license: String,
}

#[derive(Deserialize, Debug)]
struct ListTemplatesParams {
    user: String,
}

/// Why a method could not produce a result
#[derive(Debug)]
enum Failure {
    InvalidParams(String),
    Sdk(MipError),
}

impl From<MipError> for Failure {
    fn from(err: MipError) -> Self {
        Failure::Sdk(err)
    }
}

type MethodResult = Result<Value, Failure>;

// --- Server State ---
struct ServerState {
    profile: Arc<ProtectionProfile>,
    templates: Vec<TemplateDescriptor>,
    access_token: String,
    engine_lock: tokio::sync::Mutex<()>,
    // Keeps the scratch MIP directory alive when no home was configured
    _scratch: Option<tempfile::TempDir>,
}

/// Startup settings, normally read from `INFOPROTECT_*` variables
#[derive(Debug, Default)]
struct ServerOptions {
    /// Persistent MIP directory; tenant keys and licenses survive restarts.
    /// Without one the server runs from a scratch directory.
    home: Option<PathBuf>,
    offline: bool,
    templates: Option<PathBuf>,
    access_token: Option<String>,
}

impl ServerOptions {
    fn from_env() -> Self {
        Self {
            home: std::env::var_os("INFOPROTECT_HOME").map(PathBuf::from),
            offline: std::env::var("INFOPROTECT_OFFLINE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE"))
                .unwrap_or(false),
            templates: std::env::var_os("INFOPROTECT_TEMPLATES").map(PathBuf::from),
            access_token: std::env::var("INFOPROTECT_TOKEN").ok(),
        }
    }
}

impl ServerState {
    fn new(options: ServerOptions, dispatcher: Arc<dyn TaskDispatcherDelegate>) -> Result<Self> {
        let (home, scratch, storage) = match options.home {
            Some(path) => (path, None, CacheStorageType::OnDiskEncrypted),
            None => {
                let dir = tempfile::tempdir().map_err(|e| MipError::file_io(e.to_string()))?;
                (dir.path().to_path_buf(), Some(dir), CacheStorageType::InMemory)
            }
        };
        let offline = options.offline;
        let templates = match &options.templates {
            Some(path) => {
                let raw = std::fs::read(path).map_err(|e| MipError::file_io(e.to_string()))?;
                serde_json::from_slice(&raw)
                    .map_err(|e| MipError::bad_input(format!("Invalid template catalogue: {}", e)))?
            }
            None => Vec::new(),
        };

        let configuration = MipConfiguration::builder(
            ApplicationInfo::new("infoprotect-protection-server", "Protection Server", env!("CARGO_PKG_VERSION")),
            &home,
        )
        .offline_only(offline)
        .build()?;
        let context = MipContext::create(Arc::new(configuration))?;
        let profile = ProtectionProfile::load(
            ProtectionProfileSettings::new(context, storage, Arc::new(FixedConsentDelegate(Consent::AcceptAlways)))
                .task_dispatcher(dispatcher),
        )?;
        info!("Protection profile loaded from {}", home.display());

        Ok(Self {
            profile,
            templates,
            access_token: options.access_token.unwrap_or_else(|| "local-token".to_string()),
            engine_lock: tokio::sync::Mutex::new(()),
            _scratch: scratch,
        })
    }

    /// One engine per user, created on first use
    async fn engine(&self, email: &str) -> Result<Arc<ProtectionEngine>> {
        let engine_id = email.trim().to_ascii_lowercase();
        let _guard = self.engine_lock.lock().await;
        if let Some(engine) = self.profile.engine(&engine_id) {
            return Ok(engine);
        }
        let mut settings = ProtectionEngineSettings::new(Identity::new(email))
            .engine_id(engine_id.clone())
            .auth_delegate(Arc::new(StaticTokenAuthDelegate::new(self.access_token.clone())));
        for template in &self.templates {
            settings = settings.template(template.clone());
        }
        let engine = self.profile.add_engine_async(settings).await?;
        info!("Created engine {}", engine_id);
        Ok(engine)
    }
}

// --- Helper Functions ---
fn create_error_response(id: Value, code: i32, message: String) -> RpcResponse {
    error!("Responding with error: code={}, message={}", code, message);
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(RpcError { code, message, data: None }),
    }
}

fn create_sdk_error_response(id: Value, err: &MipError) -> RpcResponse {
    let mut response = create_error_response(id, -32000, err.formatted_message().to_string());
    if let Some(rpc_error) = response.error.as_mut() {
        rpc_error.data = Some(json!({
            "name": err.name(),
            "kind": format!("{:?}", err.kind()),
            "error_code": err.error_code(),
        }));
    }
    response
}

fn create_success_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: Some(result),
        error: None,
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(method: &str, params: Value) -> Result<T, Failure> {
    serde_json::from_value(params).map_err(|e| Failure::InvalidParams(format!("Invalid params for {}: {}", method, e)))
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, Failure> {
    base64::engine::general_purpose::STANDARD
        .decode(value)
        .map_err(|e| Failure::InvalidParams(format!("Invalid base64 {}: {}", field, e)))
}

fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn tool_schemas() -> Value {
    let license = json!({"type": "string", "description": "base64 publishing license"});
    json!({
        "protect": {"description": "Encrypts data under a new publishing license","schema": {"type": "object","properties": {"owner": {"type": "string"},"data": {"type": "string"},"users": {"type": "array","items": {"type": "object","properties": {"users": {"type": "array"},"rights": {"type": "array"}}}},"template_id": {"type": "string"},"json_format": {"type": "boolean"},"allow_offline_access": {"type": "boolean"}},"required": ["owner", "data"]}},
        "unprotect": {"description": "Decrypts data as a user","schema": {"type": "object","properties": {"user": {"type": "string"},"publishing_license": license,"ciphertext": {"type": "string"},"offline_only": {"type": "boolean"}},"required": ["user", "publishing_license", "ciphertext"]}},
        "access_check": {"description": "Checks one right of a user","schema": {"type": "object","properties": {"user": {"type": "string"},"publishing_license": license,"right": {"type": "string"}},"required": ["user", "publishing_license", "right"]}},
        "license_info": {"description": "Parses a publishing license","schema": {"type": "object","properties": {"publishing_license": license},"required": ["publishing_license"]}},
        "list_templates": {"description": "Lists the templates a user can publish with","schema": {"type": "object","properties": {"user": {"type": "string"}},"required": ["user"]}},
        "feature_flags": {"description": "Lists the effective flighting features","schema": {"type": "object"}}
    })
}

// --- Methods ---
async fn protect(state: &ServerState, params: Value) -> MethodResult {
    let p: ProtectParams = parse_params("protect", params)?;
    let data = decode_base64("data", &p.data)?;
    let builder = match p.template_id {
        Some(template_id) => ProtectionDescriptorBuilder::from_template(template_id),
        None => ProtectionDescriptorBuilder::from_user_rights(p.users),
    };
    let descriptor = builder.allow_offline_access(p.allow_offline_access).build()?;
    let engine = state.engine(&p.owner).await?;
    let handler = engine
        .create_protection_handler_for_publishing_async(PublishingSettings::new(descriptor).json_format(p.json_format))
        .await?;
    let ciphertext = handler.encrypt_content(&data)?;
    info!("Protected {} bytes as content {}", data.len(), handler.content_id());
    Ok(json!({
        "publishing_license": encode_base64(handler.serialized_publishing_license()),
        "ciphertext": encode_base64(&ciphertext),
        "content_id": handler.content_id(),
        "cipher_mode": handler.cipher_mode().as_str(),
    }))
}

async fn consume(
    state: &ServerState,
    user: &str,
    publishing_license: &str,
    offline_only: bool,
) -> Result<Arc<ProtectionHandler>, Failure> {
    let license = decode_base64("publishing_license", publishing_license)?;
    let engine = state.engine(user).await?;
    let settings = ConsumptionSettings::from_license(license).offline_only(offline_only);
    Ok(engine.create_protection_handler_for_consumption_async(settings).await?)
}

async fn unprotect(state: &ServerState, params: Value) -> MethodResult {
    let p: UnprotectParams = parse_params("unprotect", params)?;
    let ciphertext = decode_base64("ciphertext", &p.ciphertext)?;
    let handler = consume(state, &p.user, &p.publishing_license, p.offline_only).await?;
    let data = handler.decrypt_content(&ciphertext)?;
    Ok(json!({
        "data": encode_base64(&data),
        "rights": handler.rights(),
        "owner": handler.owner(),
        "content_id": handler.content_id(),
    }))
}

async fn access_check(state: &ServerState, params: Value) -> MethodResult {
    let p: AccessCheckParams = parse_params("access_check", params)?;
    let handler = consume(state, &p.user, &p.publishing_license, false).await?;
    Ok(json!({
        "allowed": handler.access_check(&p.right),
        "rights": handler.rights(),
    }))
}

fn license_info(state: &ServerState, params: Value) -> MethodResult {
    let p: LicenseInfoParams = parse_params("license_info", params)?;
    let license = decode_base64("publishing_license", &p.publishing_license)?;
    let info = state.profile.get_publishing_license_info(&license)?;
    Ok(json!({
        "content_id": info.content_id(),
        "owner": info.owner(),
        "issuer_id": info.issuer_id(),
        "domains": info.domains(),
        "referral_info_url": info.referral_info_url(),
        "is_double_key": info.is_double_key_license(),
        "issued_time": info.issued_time().map(|t| t.to_rfc3339()),
    }))
}

async fn list_templates(state: &ServerState, params: Value) -> MethodResult {
    let p: ListTemplatesParams = parse_params("list_templates", params)?;
    let engine = state.engine(&p.user).await?;
    let templates = engine.get_templates_async().await?;
    serde_json::to_value(templates).map_err(|e| Failure::Sdk(MipError::internal(e.to_string())))
}

fn feature_flags(state: &ServerState) -> MethodResult {
    let flags: Map<String, Value> = state
        .profile
        .context()
        .flighting_features()
        .iter()
        .map(|(feature, enabled)| (feature.name().to_string(), Value::Bool(*enabled)))
        .collect();
    Ok(Value::Object(flags))
}

type ResponseFuture = Pin<Box<dyn Future<Output = RpcResponse> + Send>>;

// --- Main Request Processor ---
fn process_request(state: Arc<ServerState>, req: RpcRequest) -> ResponseFuture {
    Box::pin(async move {
        debug!("Processing request: {:?}", req);

        if req.jsonrpc != "2.0" {
            return create_error_response(req.id, -32600, "Invalid Request: jsonrpc must be \"2.0\"".to_string());
        }

        let outcome = match req.method.as_str() {
            "help" => {
                info!("Received help request");
                let commands: Map<String, Value> = match tool_schemas() {
                    Value::Object(tools) => tools
                        .into_iter()
                        .map(|(name, def)| {
                            let description = def.get("description").cloned().unwrap_or(Value::Null);
                            (name, json!({ "description": description }))
                        })
                        .collect(),
                    _ => Map::new(),
                };
                Ok(json!({
                    "message": "Protection server: JSON-RPC 2.0 over stdio, one request per line.",
                    "commands": commands,
                }))
            }
            "initialize" => {
                info!("Received initialize request");
                let mut tools_object = Map::new();
                if let Value::Object(tool_map) = tool_schemas() {
                    for (tool_name, tool_def) in tool_map {
                        let description = tool_def.get("description").cloned().unwrap_or(Value::Null);
                        let schema = tool_def.get("schema").cloned().unwrap_or_else(|| json!({"type": "object"}));
                        tools_object.insert(tool_name, json!({ "description": description, "inputSchema": schema }));
                    }
                }
                Ok(json!({
                    "serverInfo": {"name": "infoprotect-protection-server", "version": env!("CARGO_PKG_VERSION")},
                    "sdkVersion": ProtectionProfile::version(),
                    "capabilities": { "tools": Value::Object(tools_object) },
                }))
            }
            "protect" => protect(&state, req.params).await,
            "unprotect" => unprotect(&state, req.params).await,
            "access_check" => access_check(&state, req.params).await,
            "license_info" => license_info(&state, req.params),
            "list_templates" => list_templates(&state, req.params).await,
            "feature_flags" => feature_flags(&state),
            _ => {
                warn!("Method not found: {}", req.method);
                return create_error_response(req.id, -32601, format!("Method not found: {}", req.method));
            }
        };

        match outcome {
            Ok(result) => create_success_response(req.id, result),
            Err(Failure::InvalidParams(message)) => create_error_response(req.id, -32602, message),
            Err(Failure::Sdk(err)) => create_sdk_error_response(req.id, &err),
        }
    })
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) {
    if let Err(e) = stdout.write_all(format!("{}\r\n", line).as_bytes()).await {
        error!("Failed to write response: {}", e);
    } else if let Err(e) = stdout.flush().await {
        error!("Failed to flush stdout: {}", e);
    }
}

fn serialize_response(response: &RpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!("Failed to serialize response for ID {:?}: {}", response.id, e);
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32000,"message":"Internal Server Error"}}"#.to_string()
    })
}

// --- Main Function ---
#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting protection server on stdio...");
    let dispatcher = Arc::new(TokioTaskDispatcher::with_handle(tokio::runtime::Handle::current()));
    let state = match ServerState::new(ServerOptions::from_env(), dispatcher) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Fatal: failed to load protection profile: {}", e);
            return;
        }
    };

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line_buffer = String::new();

    let ready_msg = json!({"jsonrpc": "2.0", "method": "server/ready", "params": {"status": "ready"}});
    write_line(&mut stdout, &ready_msg.to_string()).await;
    info!("Listening on stdio for JSON-RPC messages...");

    loop {
        line_buffer.clear();
        match reader.read_line(&mut line_buffer).await {
            Ok(0) => {
                info!("Stdin closed (EOF). Exiting server.");
                break;
            }
            Ok(_) => {
                let trimmed_line = line_buffer.trim();
                if trimmed_line.is_empty() {
                    continue;
                }
                debug!("<<< Received line ({} bytes)", trimmed_line.len());

                let parsed_json: Value = match serde_json::from_str(trimmed_line) {
                    Ok(v) => v,
                    Err(e) => {
                        let response = create_error_response(Value::Null, -32700, format!("Parse error: {}", e));
                        write_line(&mut stdout, &serialize_response(&response)).await;
                        continue;
                    }
                };

                // Notifications (no id or null id) never get a reply
                if parsed_json.get("id").map_or(true, Value::is_null) {
                    match parsed_json.get("method").and_then(|m| m.as_str()) {
                        Some(method) => info!("Received notification: {}", method),
                        None => warn!("Received notification without method field"),
                    }
                    continue;
                }

                let req: RpcRequest = match serde_json::from_value(parsed_json.clone()) {
                    Ok(r) => r,
                    Err(e) => {
                        let id = parsed_json.get("id").cloned().unwrap_or(Value::Null);
                        let response = create_error_response(id, -32600, format!("Invalid Request: {}", e));
                        write_line(&mut stdout, &serialize_response(&response)).await;
                        continue;
                    }
                };

                let request_id = req.id.clone();
                let request_method = req.method.clone();
                let response = match tokio::time::timeout(REQUEST_TIMEOUT, process_request(state.clone(), req)).await {
                    Ok(response) => response,
                    Err(_) => {
                        error!("Request timed out for Method '{}', ID {:?}", request_method, request_id);
                        create_error_response(
                            request_id,
                            -32000,
                            format!("Request timed out for method '{}'", request_method),
                        )
                    }
                };
                write_line(&mut stdout, &serialize_response(&response)).await;
            }
            Err(e) => {
                error!("Error reading from stdin: {}. Exiting.", e);
                break;
            }
        }
    }
    info!("Protection server shutting down.");
}
