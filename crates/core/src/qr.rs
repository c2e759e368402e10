//! Gate passes: signed gate codes, the QR payload, and the image encoder seam.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{NaiveDate, NaiveTime};
use hmac::{Hmac, Mac};
use qrcode::render::svg;
use qrcode::{EcLevel, QrCode as Symbol};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{EncodeError, OutingError, OutingResult};
use crate::ids::OutingId;
use crate::model::{OutingRequest, OutingStatus, StudentProfile};
use crate::time::EpochMs;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    CheckOut,
    CheckIn,
}

impl ScanKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ScanKind::CheckOut => "OUTING-OUT",
            ScanKind::CheckIn => "OUTING-IN",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "OUTING-OUT" => Some(ScanKind::CheckOut),
            "OUTING-IN" => Some(ScanKind::CheckIn),
            _ => None,
        }
    }
}

/// `<prefix>:<request id>:<issued at ms>:<hex hmac>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateCode {
    pub kind: ScanKind,
    pub request_id: OutingId,
    pub issued_at: EpochMs,
    pub signature: String,
}

impl GateCode {
    pub fn parse(raw: &str) -> OutingResult<Self> {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        let [prefix, id, issued_at, signature] = parts.as_slice() else {
            return Err(OutingError::MalformedCode);
        };
        let kind = ScanKind::from_prefix(prefix).ok_or(OutingError::MalformedCode)?;
        let issued_at: EpochMs = issued_at.parse().map_err(|_| OutingError::MalformedCode)?;
        if id.is_empty() || signature.is_empty() {
            return Err(OutingError::MalformedCode);
        }
        Ok(Self {
            kind,
            request_id: OutingId::from_str(*id),
            issued_at,
            signature: signature.to_string(),
        })
    }

    fn signed_body(kind: ScanKind, id: &OutingId, issued_at: EpochMs) -> String {
        format!("{}:{}:{}", kind.prefix(), id.as_str(), issued_at)
    }
}

impl std::fmt::Display for GateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}",
            Self::signed_body(self.kind, &self.request_id, self.issued_at),
            self.signature
        )
    }
}

/// Signs and checks gate codes with a shared secret.
#[derive(Clone)]
pub struct GateSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for GateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateSigner").finish_non_exhaustive()
    }
}

impl GateSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self { key: secret.as_ref().to_vec() }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("hmac accepts keys of any length")
    }

    pub fn issue(&self, kind: ScanKind, request_id: &OutingId, issued_at: EpochMs) -> GateCode {
        let mut mac = self.mac();
        mac.update(GateCode::signed_body(kind, request_id, issued_at).as_bytes());
        GateCode {
            kind,
            request_id: request_id.clone(),
            issued_at,
            signature: hex::encode(mac.finalize().into_bytes()),
        }
    }

    pub fn verify(&self, code: &GateCode) -> bool {
        let Ok(sig) = hex::decode(&code.signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(GateCode::signed_body(code.kind, &code.request_id, code.issued_at).as_bytes());
        mac.verify_slice(&sig).is_ok()
    }
}

/// What the gate scanner sees after decoding the image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QrPayload {
    pub kind: ScanKind,
    pub gate_code: String,
    pub request_id: OutingId,
    pub student_name: String,
    pub roll_number: String,
    pub phone: String,
    pub parent_phone: String,
    pub branch: String,
    pub room_number: String,
    pub outing_date: NaiveDate,
    pub outing_time: NaiveTime,
    pub return_time: NaiveTime,
    pub status: OutingStatus,
    pub warden_approved_at: Option<EpochMs>,
}

impl QrPayload {
    pub fn new(code: &GateCode, req: &OutingRequest, student: &StudentProfile) -> Self {
        Self {
            kind: code.kind,
            gate_code: code.to_string(),
            request_id: req.id.clone(),
            student_name: student.name.clone(),
            roll_number: student.roll_number.clone(),
            phone: student.phone.clone(),
            parent_phone: student.parent_phone.clone(),
            branch: student.branch.clone(),
            room_number: student.room_number.clone(),
            outing_date: req.outing_date,
            outing_time: req.outing_time,
            return_time: req.return_time,
            status: req.status,
            warden_approved_at: req.approvals.warden.approved_at,
        }
    }
}

/// Pulls the gate code out of whatever the scanner handed over: either the
/// bare code or the JSON payload read off the image.
pub fn extract_gate_code(scanned: &str) -> OutingResult<GateCode> {
    let trimmed = scanned.trim();
    if trimmed.starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|_| OutingError::MalformedCode)?;
        let code = value
            .get("gate_code")
            .and_then(|v| v.as_str())
            .ok_or(OutingError::MalformedCode)?;
        return GateCode::parse(code);
    }
    GateCode::parse(trimmed)
}

/// Turns a serialized payload into a scannable image.
pub trait QrEncoder: Send + Sync {
    /// Returns a `data:` URL.
    fn encode(&self, payload: &str) -> Result<String, EncodeError>;
}

/// Renders QR symbols as SVG, returned as a base64 data URL.
#[derive(Debug, Clone)]
pub struct SvgQrEncoder {
    pub min_dimension: u32,
}

impl Default for SvgQrEncoder {
    fn default() -> Self {
        Self { min_dimension: 256 }
    }
}

impl QrEncoder for SvgQrEncoder {
    fn encode(&self, payload: &str) -> Result<String, EncodeError> {
        let symbol = Symbol::with_error_correction_level(payload.as_bytes(), EcLevel::M)
            .map_err(|e| EncodeError::Capacity(e.to_string()))?;
        let image = symbol
            .render()
            .min_dimensions(self.min_dimension, self.min_dimension)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build();
        Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_code_round_trips_and_verifies() {
        let signer = GateSigner::new("s3cret");
        let id = OutingId::from_str("01JABCDEF");
        let code = signer.issue(ScanKind::CheckOut, &id, 1_700_000_000_000);
        let text = code.to_string();
        assert!(text.starts_with("OUTING-OUT:01JABCDEF:1700000000000:"));

        let parsed = GateCode::parse(&text).unwrap();
        assert_eq!(parsed, code);
        assert!(signer.verify(&parsed));
    }

    #[test]
    fn tampered_or_foreign_codes_fail_verification() {
        let signer = GateSigner::new("s3cret");
        let id = OutingId::from_str("r1");
        let code = signer.issue(ScanKind::CheckIn, &id, 42);

        let mut flipped = code.clone();
        flipped.kind = ScanKind::CheckOut;
        assert!(!signer.verify(&flipped));

        let mut later = code.clone();
        later.issued_at = 43;
        assert!(!signer.verify(&later));

        assert!(!GateSigner::new("other").verify(&code));

        let mut garbage = code;
        garbage.signature = "zz".into();
        assert!(!signer.verify(&garbage));
    }

    #[test]
    fn parse_rejects_non_gate_strings() {
        for raw in ["", "hello", "OUTING-OUT:r1:notanumber:ab", "BADGE:r1:1:ab", "OUTING-IN:r1:1", "OUTING-IN::1:ab"] {
            assert!(matches!(GateCode::parse(raw), Err(OutingError::MalformedCode)), "{raw}");
        }
    }

    #[test]
    fn gate_code_is_extracted_from_json_payload() {
        let signer = GateSigner::new("k");
        let code = signer.issue(ScanKind::CheckIn, &OutingId::from_str("r9"), 7);
        let json = serde_json::json!({ "kind": "check_in", "gate_code": code.to_string() }).to_string();
        assert_eq!(extract_gate_code(&json).unwrap(), code);
        assert_eq!(extract_gate_code(&format!("  {code}\n")).unwrap(), code);
        assert!(matches!(extract_gate_code(r#"{"nope":1}"#), Err(OutingError::MalformedCode)));
    }

    #[test]
    fn svg_encoder_produces_data_url() {
        let url = SvgQrEncoder::default().encode(r#"{"gate_code":"OUTING-OUT:r1:1:ab"}"#).unwrap();
        let body = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg_bytes = STANDARD.decode(body).unwrap();
        assert!(String::from_utf8(svg_bytes).unwrap().contains("<svg"));
    }

    #[test]
    fn svg_encoder_rejects_oversized_payload() {
        let huge = "x".repeat(8_000);
        let err = SvgQrEncoder::default().encode(&huge).unwrap_err();
        assert!(matches!(err, EncodeError::Capacity(_)));
    }
}
