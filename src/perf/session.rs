//! Per-file session state: the registry routing sample ids to their
//! `perf_event_attr`, plus metadata collected from feature sections
//! (cmdline, per-event names, build ids).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::mapping::BuildId;
use crate::perf::abi::*;
use crate::perf::attrs::PerfEventAttr;
use crate::perf::FormatError;
use crate::reader::RecordReader;

#[derive(Default)]
struct SessionMetadata {
    cmdline: Option<Vec<String>>,
    build_ids: HashMap<(i32, String), BuildId>,
}

pub struct PerfSession {
    perf_session_id: u32,
    attrs: Vec<Arc<PerfEventAttr>>,
    attrs_by_id: HashMap<u64, Arc<PerfEventAttr>>,
    metadata: Mutex<SessionMetadata>,
}

pub struct Builder {
    perf_session_id: u32,
    entries: Vec<(perf_event_attr, Vec<u64>)>,
}

impl PerfSession {
    pub fn builder(perf_session_id: u32) -> Builder {
        Builder {
            perf_session_id,
            entries: Vec::new(),
        }
    }

    pub fn perf_session_id(&self) -> u32 {
        self.perf_session_id
    }

    pub fn attrs(&self) -> &[Arc<PerfEventAttr>] {
        &self.attrs
    }

    /// Resolves the attr a record belongs to.
    ///
    /// With a single declared attr every record trivially belongs to it.
    /// Otherwise the record must carry a sample id (start-relative for SAMPLE
    /// records, end-relative suffix for the rest) registered with one of the
    /// attrs.
    pub fn find_attr_for_record(
        &self,
        header: &perf_event_header,
        payload: &[u8],
    ) -> Result<Arc<PerfEventAttr>, FormatError> {
        let first = Arc::clone(&self.attrs[0]);
        // Synthetic records emitted by the perf tool itself carry no id.
        if header._type >= PERF_RECORD_USER_TYPE_START {
            return Ok(first);
        }
        if self.attrs.len() == 1 {
            return Ok(first);
        }

        let id = self
            .extract_sample_id(header, payload)
            .map_err(|e| FormatError::AttrLookup(Box::new(e)))?;
        self.attrs_by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| FormatError::AttrLookup(Box::new(FormatError::UnknownSampleId(id))))
    }

    fn extract_sample_id(
        &self,
        header: &perf_event_header,
        payload: &[u8],
    ) -> Result<u64, FormatError> {
        // Build() guarantees all attrs agree on these offsets.
        let attr = &self.attrs[0];
        let mut reader = RecordReader::new(payload);
        let skip = if header._type == PERF_RECORD_SAMPLE {
            attr.id_offset_from_start()
                .ok_or(FormatError::MissingSampleId)?
        } else {
            let offset = attr
                .id_offset_from_end()
                .ok_or(FormatError::MissingSampleId)?;
            reader
                .size_left()
                .checked_sub(offset)
                .ok_or(FormatError::MissingSampleId)?
        };
        reader
            .skip(skip)
            .and_then(|_| reader.read_u64())
            .ok_or(FormatError::MissingSampleId)
    }

    pub fn find_attr_for_event_id(&self, id: u64) -> Option<Arc<PerfEventAttr>> {
        self.attrs_by_id.get(&id).cloned()
    }

    pub fn set_event_name(&self, id: u64, name: String) {
        if let Some(attr) = self.attrs_by_id.get(&id) {
            attr.set_event_name(name);
        }
    }

    pub fn set_event_name_for_config(&self, event_type: u32, config: u64, name: &str) {
        for attr in &self.attrs {
            if attr.event_type() == event_type && attr.config() == config {
                attr.set_event_name(name.to_string());
            }
        }
    }

    pub fn set_cmdline(&self, args: Vec<String>) {
        self.metadata.lock().expect("session metadata poisoned").cmdline = Some(args);
    }

    pub fn cmdline(&self) -> Option<Vec<String>> {
        self.metadata
            .lock()
            .expect("session metadata poisoned")
            .cmdline
            .clone()
    }

    pub fn add_build_id(&self, pid: i32, filename: String, build_id: BuildId) {
        self.metadata
            .lock()
            .expect("session metadata poisoned")
            .build_ids
            .insert((pid, filename), build_id);
    }

    pub fn lookup_build_id(&self, pid: u32, filename: &str) -> Option<BuildId> {
        self.metadata
            .lock()
            .expect("session metadata poisoned")
            .build_ids
            .get(&(pid as i32, filename.to_string()))
            .cloned()
    }
}

impl Builder {
    pub fn add_attr_and_ids(&mut self, attr: perf_event_attr, ids: Vec<u64>) {
        self.entries.push((attr, ids));
    }

    pub fn build(self) -> Result<Arc<PerfSession>, FormatError> {
        if self.entries.is_empty() {
            return Err(FormatError::NoAttrs);
        }

        let mut attrs = Vec::with_capacity(self.entries.len());
        let mut attrs_by_id: HashMap<u64, Arc<PerfEventAttr>> = HashMap::new();
        for (raw, ids) in self.entries {
            let attr = Arc::new(PerfEventAttr::new(raw));
            for id in ids {
                if attrs_by_id.insert(id, Arc::clone(&attr)).is_some() {
                    return Err(FormatError::DuplicateSampleId(id));
                }
            }
            attrs.push(attr);
        }

        // Records can only be routed by id if every attr places the id at the
        // same spot inside the record.
        if attrs.len() > 1 {
            let start = attrs[0].id_offset_from_start();
            let end = attrs[0].id_offset_from_end();
            if start.is_none() && end.is_none() {
                return Err(FormatError::IncompatibleAttrLayouts);
            }
            for attr in &attrs[1..] {
                if attr.id_offset_from_start() != start || attr.id_offset_from_end() != end {
                    return Err(FormatError::IncompatibleAttrLayouts);
                }
            }
        }

        Ok(Arc::new(PerfSession {
            perf_session_id: self.perf_session_id,
            attrs,
            attrs_by_id,
            metadata: Mutex::new(SessionMetadata::default()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr_with_ids(sample_type: u64) -> perf_event_attr {
        let mut attr = perf_event_attr::default();
        attr.sample_type = sample_type;
        attr.flags.set_sample_id_all(1);
        attr
    }

    const ROUTED: u64 =
        PERF_SAMPLE_TID | PERF_SAMPLE_TIME | PERF_SAMPLE_CPU | PERF_SAMPLE_ID;

    fn two_attr_session() -> Arc<PerfSession> {
        let mut builder = PerfSession::builder(0);
        builder.add_attr_and_ids(attr_with_ids(ROUTED), vec![10]);
        builder.add_attr_and_ids(attr_with_ids(ROUTED), vec![20]);
        builder.build().unwrap()
    }

    fn sample_header() -> perf_event_header {
        perf_event_header {
            _type: PERF_RECORD_SAMPLE,
            misc: 0,
            size: 0,
        }
    }

    #[test]
    fn test_single_attr_routes_everything() {
        let mut builder = PerfSession::builder(0);
        builder.add_attr_and_ids(perf_event_attr::default(), Vec::new());
        let session = builder.build().unwrap();
        assert!(session
            .find_attr_for_record(&sample_header(), &[])
            .is_ok());
    }

    #[test]
    fn test_sample_routed_by_id_at_start() {
        let session = two_attr_session();
        // SAMPLE layout for ROUTED: tid/pid(8), time(8), id(8), cpu(8).
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&20u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        let attr = session
            .find_attr_for_record(&sample_header(), &payload)
            .unwrap();
        assert!(Arc::ptr_eq(&attr, session.find_attr_for_event_id(20).as_ref().unwrap()));
    }

    #[test]
    fn test_non_sample_routed_by_id_at_end() {
        let session = two_attr_session();
        // Suffix for ROUTED: pid/tid(8), time(8), id(8), cpu(8).
        let mut payload = vec![0xaa; 16]; // record body
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&10u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        let header = perf_event_header {
            _type: PERF_RECORD_COMM,
            misc: 0,
            size: 0,
        };
        let attr = session.find_attr_for_record(&header, &payload).unwrap();
        assert!(Arc::ptr_eq(&attr, session.find_attr_for_event_id(10).as_ref().unwrap()));
    }

    #[test]
    fn test_unregistered_id_fails() {
        let session = two_attr_session();
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&99u64.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        assert!(session
            .find_attr_for_record(&sample_header(), &payload)
            .is_err());
    }

    #[test]
    fn test_duplicate_id_rejected_at_build() {
        let mut builder = PerfSession::builder(0);
        builder.add_attr_and_ids(attr_with_ids(ROUTED), vec![10]);
        builder.add_attr_and_ids(attr_with_ids(ROUTED), vec![10]);
        assert!(matches!(
            builder.build(),
            Err(FormatError::DuplicateSampleId(10))
        ));
    }

    #[test]
    fn test_incompatible_layouts_rejected() {
        let mut builder = PerfSession::builder(0);
        builder.add_attr_and_ids(attr_with_ids(ROUTED), vec![10]);
        builder.add_attr_and_ids(attr_with_ids(PERF_SAMPLE_ID), vec![20]);
        assert!(matches!(
            builder.build(),
            Err(FormatError::IncompatibleAttrLayouts)
        ));
    }

    #[test]
    fn test_empty_session_rejected() {
        assert!(matches!(
            PerfSession::builder(0).build(),
            Err(FormatError::NoAttrs)
        ));
    }

    #[test]
    fn test_build_id_metadata() {
        let mut builder = PerfSession::builder(0);
        builder.add_attr_and_ids(perf_event_attr::default(), Vec::new());
        let session = builder.build().unwrap();
        session.add_build_id(42, "/bin/true".to_string(), BuildId::from_raw(&[1, 2]));
        assert_eq!(
            session.lookup_build_id(42, "/bin/true").map(|b| b.to_hex()),
            Some("0102".to_string())
        );
        assert!(session.lookup_build_id(42, "/bin/false").is_none());
        assert!(session.lookup_build_id(7, "/bin/true").is_none());
    }

    #[test]
    fn test_event_names() {
        let session = two_attr_session();
        session.set_event_name(20, "cache-misses".to_string());
        assert_eq!(
            session.find_attr_for_event_id(20).unwrap().event_name(),
            Some("cache-misses".to_string())
        );
        assert_eq!(session.find_attr_for_event_id(10).unwrap().event_name(), None);
    }
}
