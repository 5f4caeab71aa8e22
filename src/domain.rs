//! The data model shared by every other component: [`Domain`], op codes, and the
//! per-domain operation-name tables that back `op_string`/`op_code` (§6).

use crate::error::Error;

/// A traced surface. Closed by design — adding a domain means adding a table
/// entry in [`Domain::op_count`]/[`Domain::op_names`], not an open extension point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Domain {
    /// Host-side runtime API calls (the synchronous entry points an application
    /// calls directly, e.g. queue creation, memory copy submission).
    HostApi,
    /// Device-side operations: kernel dispatch, async copy, barrier completion.
    /// Reached only via activity records, never a direct callback.
    DeviceOps,
    /// Application-supplied annotation ranges (C11).
    Annotation,
    /// The external-correlation marker pseudo-domain (carries exactly one op,
    /// `EXTERN_ID`, emitted by the dispatcher's external-correlation weave).
    ExternalMarker,
}

pub const ALL_DOMAINS: [Domain; 4] = [
    Domain::HostApi,
    Domain::DeviceOps,
    Domain::Annotation,
    Domain::ExternalMarker,
];

/// A dense, zero-based operation code within a [`Domain`].
pub type OpCode = u32;

/// Selects between alternate name renderings for an op (e.g. a device op may have
/// a short name and a kernel-name variant); most domains ignore it.
pub type Kind = u32;

pub const EXTERN_ID_OP: OpCode = 0;

const HOST_API_NAMES: &[&str] = &[
    "init", "device_get_count", "device_get_name", "stream_create", "stream_destroy",
    "stream_synchronize", "memcpy", "memcpy_async", "malloc", "free", "module_load",
    "module_unload", "kernel_launch", "event_create", "event_destroy", "event_record",
    "event_synchronize", "event_elapsed_time", "context_create", "context_destroy",
    "set_device", "get_device", "device_synchronize", "host_malloc", "host_free",
    "memset", "memset_async", "get_last_error", "peek_last_error", "device_can_access_peer",
    "device_enable_peer_access", "runtime_get_version",
];

const DEVICE_OPS_NAMES: &[&str] = &[
    "kernel_dispatch", "copy_h2d", "copy_d2h", "copy_d2d", "barrier", "fill", "wait_event",
    "signal_event", "atomic", "scratch_alloc", "scratch_free", "indirect_launch", "cache_flush",
    "page_migrate", "queue_full_stall", "unknown",
];

const ANNOTATION_NAMES: &[&str] = &["mark", "range_push", "range_pop", "range_start", "range_stop"];

const EXTERNAL_MARKER_NAMES: &[&str] = &["extern_id"];

impl Domain {
    pub fn op_count(self) -> usize {
        self.op_names().len()
    }

    fn op_names(self) -> &'static [&'static str] {
        match self {
            Domain::HostApi => HOST_API_NAMES,
            Domain::DeviceOps => DEVICE_OPS_NAMES,
            Domain::Annotation => ANNOTATION_NAMES,
            Domain::ExternalMarker => EXTERNAL_MARKER_NAMES,
        }
    }

    pub fn contains_op(self, op: OpCode) -> bool {
        (op as usize) < self.op_count()
    }
}

/// `op_string(domain, op, kind)` — human-readable static string, or an error.
///
/// `kind` is currently unused by every table (no domain defines per-kind
/// alternate names yet) but is threaded through so a future domain can add one
/// without changing the public signature.
pub fn op_string(domain: Domain, op: OpCode, _kind: Kind) -> Result<&'static str, Error> {
    domain
        .op_names()
        .get(op as usize)
        .copied()
        .ok_or_else(|| {
            crate::error::record(Error::InvalidArgument(format!(
                "op {op} out of range for domain {domain:?}"
            )))
        })
}

/// `op_code(domain, name) -> (op, kind)` — numeric op, or `INVALID_ARGUMENT`.
pub fn op_code(domain: Domain, name: &str) -> Result<(OpCode, Kind), Error> {
    domain
        .op_names()
        .iter()
        .position(|&n| n == name)
        .map(|idx| (idx as OpCode, 0))
        .ok_or_else(|| crate::error::record(Error::InvalidArgument(format!("unknown op name {name:?} in domain {domain:?}"))))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_every_op() {
        for &domain in ALL_DOMAINS.iter() {
            for op in 0..domain.op_count() as OpCode {
                let name = op_string(domain, op, 0).unwrap();
                let (round_tripped, _) = op_code(domain, name).unwrap();
                assert_eq!(round_tripped, op);
            }
        }
    }

    #[test]
    fn out_of_range_op_is_invalid_argument() {
        let err = op_string(Domain::Annotation, 999, 0).unwrap_err();
        assert_eq!(err.status(), crate::error::Status::InvalidArgument);
    }

    #[test]
    fn unknown_name_is_invalid_argument() {
        let err = op_code(Domain::HostApi, "does_not_exist").unwrap_err();
        assert_eq!(err.status(), crate::error::Status::InvalidArgument);
    }
}
