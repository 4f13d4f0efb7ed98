//! JSON-RPC request envelope posted through `rpostback`.

use serde::{Deserialize, Serialize};

/// JSON-RPC version string carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// The only RPC method the bridge uses: type code into the live console.
pub const CONSOLE_INPUT_METHOD: &str = "console_input";

/// Console input parameters: `[code, console_id, flags]`.
///
/// The second and third slots are always `""` and `0` for the main console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleInputParams(pub String, pub String, pub u32);

impl ConsoleInputParams {
	pub fn new(code: impl Into<String>) -> Self {
		Self(code.into(), String::new(), 0)
	}

	pub fn code(&self) -> &str {
		&self.0
	}
}

/// One request envelope.
///
/// Field order matches the literal object the session expects:
/// `{"jsonrpc":"2.0","method":"console_input","clientId":"…","params":["…","",0],"id":N}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEnvelope {
	pub jsonrpc: String,
	pub method: String,
	#[serde(rename = "clientId")]
	pub client_id: String,
	pub params: ConsoleInputParams,
	pub id: u64,
}

impl RpcEnvelope {
	/// Builds a `console_input` envelope for `code`.
	pub fn console_input(client_id: impl Into<String>, code: impl Into<String>, id: u64) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_string(),
			method: CONSOLE_INPUT_METHOD.to_string(),
			client_id: client_id.into(),
			params: ConsoleInputParams::new(code),
			id,
		}
	}

	/// Serializes the envelope into the single-line argument passed to the bridge.
	///
	/// JSON string escaping covers backslashes, quotes, newlines and the
	/// remaining control characters, so arbitrary code embeds safely.
	pub fn to_argument(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}
}
