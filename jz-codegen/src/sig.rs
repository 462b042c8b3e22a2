//! The `jz:sig` custom section: a JSON descriptor of export signatures and
//! object schemas for the host-side marshaling layer.

use std::collections::BTreeMap;

use serde::Serialize;

/// The section payload.
#[derive(Debug, Default, Serialize)]
pub(crate) struct SigSection {
    /// Export name → signature.
    pub exports: BTreeMap<String, ExportSig>,
    /// Schema id → field descriptors, in slot order.
    pub schemas: BTreeMap<String, Vec<SchemaField>>,
}

/// One export's signature.
#[derive(Debug, Serialize)]
pub(crate) struct ExportSig {
    pub params: Vec<&'static str>,
    pub result: &'static str,
}

impl ExportSig {
    pub fn f64s(arity: usize) -> Self {
        Self {
            params: vec!["f64"; arity],
            result: "f64",
        }
    }
}

/// One object field.
#[derive(Debug, Serialize)]
pub(crate) struct SchemaField {
    pub name: String,
    pub ty: &'static str,
}

impl SigSection {
    pub fn add_schema(&mut self, id: u16, fields: &[String]) {
        self.schemas.insert(
            id.to_string(),
            fields
                .iter()
                .map(|name| SchemaField {
                    name: name.clone(),
                    ty: "f64",
                })
                .collect(),
        );
    }

    /// Render the whole custom-section module field.
    pub fn render(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("(@custom \"jz:sig\" \"{}\")", escape_wat_string(&json))
    }
}

/// Escape a UTF-8 string for a WAT string literal.
pub(crate) fn escape_wat_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(byte as char),
            other => out.push_str(&format!("\\{other:02x}")),
        }
    }
    out
}

/// Escape raw bytes for a WAT data-segment literal.
pub(crate) fn escape_wat_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        out.push_str(&format!("\\{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_exports_and_schemas() {
        let mut sig = SigSection::default();
        sig.exports.insert("main".into(), ExportSig::f64s(2));
        sig.add_schema(0, &["x".into(), "y".into()]);
        let text = sig.render();
        assert!(text.starts_with("(@custom \"jz:sig\""));
        assert!(text.contains("\\\"main\\\""));
        assert!(text.contains("\\\"params\\\""));
        assert!(text.contains("\\\"x\\\""));
    }

    #[test]
    fn escaping_is_wat_safe() {
        assert_eq!(escape_wat_string(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_wat_string("é"), "\\c3\\a9");
        assert_eq!(escape_wat_bytes(&[0, 255, 65]), "\\00\\ff\\41");
    }
}
