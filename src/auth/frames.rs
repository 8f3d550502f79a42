//! # auth::frames: ClearNode RPC envelope
//!
//! ClearNode พูด JSON-RPC แบบ positional array:
//!
//! ```text
//! request  → {"req":[id, method, [params], ts], "sig":[signature, ...]}
//! response ← {"res":[id, method, [params], ts]}
//! error    ← {"err":[id, code, message]}
//! ```
//!
//! Frame ขาเข้าถูก decode ครั้งเดียวที่ transport boundary เป็น [`InboundFrame`].
//! ไม่มีใครอ่าน `res[1]` เองอีก.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::FrameError;

// ─── Inbound ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `auth_challenge`: nonce ที่ต้องเซ็นกลับ
    Challenge { challenge: String },
    /// `auth_success` / `auth_verify` ที่ verify ผ่าน
    AuthSuccess { jwt: Option<String> },
    /// `auth_failure` หรือ `auth_verify` ที่ `success = false`
    AuthFailure { reason: String },
    /// `create_app_session`: session id จาก counterparty
    SessionCreated { app_session_id: String },
    /// `err` envelope หรือ `res` method = `error`
    Error { code: String, message: String },
    /// Method ที่ไม่รู้จัก: caller log แล้วทิ้ง
    Unknown { method: String },
}

impl InboundFrame {
    pub fn name(&self) -> &str {
        match self {
            InboundFrame::Challenge { .. }      => "auth_challenge",
            InboundFrame::AuthSuccess { .. }    => "auth_success",
            InboundFrame::AuthFailure { .. }    => "auth_failure",
            InboundFrame::SessionCreated { .. } => "create_app_session",
            InboundFrame::Error { .. }          => "error",
            InboundFrame::Unknown { method }    => method.as_str(),
        }
    }
}

/// Decode text frame หนึ่งอัน
pub fn decode(raw: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(raw)?;

    if let Some(res) = value.get("res") {
        return decode_response(res);
    }
    if let Some(err) = value.get("err") {
        return decode_error(err);
    }
    Err(FrameError::Malformed("frame has neither `res` nor `err`".into()))
}

fn decode_response(res: &Value) -> Result<InboundFrame, FrameError> {
    let parts = res
        .as_array()
        .ok_or_else(|| FrameError::Malformed("`res` is not an array".into()))?;
    let method = parts
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| FrameError::Malformed("`res[1]` method is missing".into()))?;
    // params เป็น array; payload จริงอยู่ที่ตัวแรก
    let params = parts.get(2).and_then(Value::as_array);
    let first = params.and_then(|p| p.first());
    let field = |name: &str| first.and_then(|p| p.get(name)).and_then(Value::as_str);

    let frame = match method {
        "auth_challenge" => {
            let challenge = field("challenge_message").ok_or_else(|| {
                FrameError::Malformed("auth_challenge without challenge_message".into())
            })?;
            InboundFrame::Challenge { challenge: challenge.to_string() }
        }
        "auth_success" => InboundFrame::AuthSuccess {
            jwt: field("jwt_token").map(str::to_string),
        },
        "auth_verify" => {
            let success = first
                .and_then(|p| p.get("success"))
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if success {
                InboundFrame::AuthSuccess { jwt: field("jwt_token").map(str::to_string) }
            } else {
                InboundFrame::AuthFailure { reason: describe(params) }
            }
        }
        "auth_failure" => InboundFrame::AuthFailure { reason: describe(params) },
        "create_app_session" => {
            let id = field("app_session_id").ok_or_else(|| {
                FrameError::Malformed("create_app_session without app_session_id".into())
            })?;
            InboundFrame::SessionCreated { app_session_id: id.to_string() }
        }
        "error" => InboundFrame::Error {
            code:    "error".into(),
            message: field("error").map(str::to_string).unwrap_or_else(|| describe(params)),
        },
        other => InboundFrame::Unknown { method: other.to_string() },
    };
    Ok(frame)
}

fn decode_error(err: &Value) -> Result<InboundFrame, FrameError> {
    let parts = err
        .as_array()
        .ok_or_else(|| FrameError::Malformed("`err` is not an array".into()))?;
    let text = |v: Option<&Value>| match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Ok(InboundFrame::Error {
        code:    text(parts.get(1)),
        message: text(parts.get(2)),
    })
}

/// เหตุผลแบบอ่านได้จาก params (ใช้ `reason` / `error` / `message` ถ้ามี)
fn describe(params: Option<&Vec<Value>>) -> String {
    let Some(params) = params else {
        return "no reason given".into();
    };
    params
        .first()
        .and_then(|p| {
            ["reason", "error", "message"]
                .iter()
                .find_map(|k| p.get(*k).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| Value::Array(params.clone()).to_string())
}

// ─── Outbound ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allowance {
    pub asset:  String,
    pub amount: String,
}

/// Params ของ `auth_request`
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequestParams {
    pub address:     String,
    pub session_key: String,
    pub app_name:    String,
    pub allowances:  Vec<Allowance>,
    pub expire:      u64,
    pub scope:       String,
    pub application: String,
}

/// `[id, method, [params], ts]`: ส่วนที่ถูกเซ็นใน `sig`
pub fn request_payload(id: u64, method: &str, params: Value, timestamp: i64) -> Value {
    json!([id, method, [params], timestamp])
}

pub fn envelope(payload: Value, signatures: Vec<String>) -> String {
    json!({ "req": payload, "sig": signatures }).to_string()
}

pub fn auth_request(id: u64, params: &AuthRequestParams, timestamp: i64) -> String {
    let params = serde_json::to_value(params).unwrap_or(Value::Null);
    envelope(request_payload(id, "auth_request", params, timestamp), Vec::new())
}

pub fn auth_verify(id: u64, challenge: &str, signature: String, timestamp: i64) -> String {
    envelope(
        request_payload(id, "auth_verify", json!({ "challenge": challenge }), timestamp),
        vec![signature],
    )
}

/// Params ของ `create_app_session`: definition สองฝั่ง + allocation เริ่มต้นเป็น usdc
pub fn app_session_params(participant: &str, allocation: u64, nonce: i64) -> Value {
    json!({
        "definition": {
            "protocol":     "nitroliterpc",
            "participants": [participant, participant],
            "weights":      [100, 0],
            "quorum":       100,
            "challenge":    0,
            "nonce":        nonce,
        },
        "allocations": [{
            "participant": participant,
            "asset":       "usdc",
            "amount":      allocation.to_string(),
        }],
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────
