use subtle::ConstantTimeEq;

/// Constant-time equality for secrets (signatures, passwords, tokens).
///
/// Length mismatches return early; only the contents are compared in
/// constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}
