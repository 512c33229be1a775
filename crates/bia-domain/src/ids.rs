//! Id generation. Task/tool-call ids and LLM stream ids are distinct
//! namespaces in the source this protocol was distilled from — kept
//! separate here rather than collapsed into one generator, so the two
//! kinds stay visually distinguishable in logs and tests.

use rand::RngCore;

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A new task/tool-call unique id: `mxgen_<24 hex chars>`.
pub fn new_task_id() -> String {
    format!("mxgen_{}", random_hex(12))
}

/// A new LLM stream id: `call_<24 hex chars>`.
pub fn new_stream_id() -> String {
    format!("call_{}", random_hex(12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_has_expected_prefix_and_length() {
        let id = new_task_id();
        assert!(id.starts_with("mxgen_"));
        assert_eq!(id.len(), "mxgen_".len() + 24);
    }

    #[test]
    fn stream_id_has_expected_prefix_and_length() {
        let id = new_stream_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 24);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_task_id(), new_task_id());
    }
}
