//! Per-client state held by the server: the raw object pool uploads, the
//! parsed pool, the parse job flag, and the maintenance heartbeat timestamp.
use alloc::vec::Vec;

use crate::protocol::network::control_function::CfHandle;
use crate::protocol::vt::colour_table::VtColourTable;
use crate::protocol::vt::objects::NULL_OBJECT_ID;
use crate::protocol::vt::pool::ObjectPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Lifecycle of the one-shot pool parse job.
pub enum PoolParseState {
    /// No parse requested.
    Idle,
    /// Parse requested; the server runs it from its update pass.
    Running,
    /// Parse finished, pool activated, completion response still owed.
    Success,
    /// Parse failed; `faulting_object_id` names the culprit.
    Fail,
}

/// One connected VT client and everything the server tracks about it.
pub struct ManagedWorkingSet {
    control_function: CfHandle,
    /// Raw pool uploads, one buffer per transfer or loaded version.
    iop_files: Vec<Vec<u8>>,
    pool: ObjectPool,
    colour_table: VtColourTable,
    parse_state: PoolParseState,
    faulting_object_id: u16,
    maintenance_timestamp_ms: u64,
    client_version: u8,
}

impl ManagedWorkingSet {
    /// Track a client that just announced itself.
    pub fn new(control_function: CfHandle, client_version: u8, now_ms: u64) -> Self {
        Self {
            control_function,
            iop_files: Vec::new(),
            pool: ObjectPool::new(),
            colour_table: VtColourTable::new(),
            parse_state: PoolParseState::Idle,
            faulting_object_id: NULL_OBJECT_ID,
            maintenance_timestamp_ms: now_ms,
            client_version,
        }
    }

    /// The client this working set belongs to.
    pub fn control_function(&self) -> CfHandle {
        self.control_function
    }

    /// VT version byte the client announced at attach.
    pub fn client_version(&self) -> u8 {
        self.client_version
    }

    //==================================================================================Raw pool data

    /// Store one raw pool buffer (an object pool transfer or a version
    /// recalled from storage).
    pub fn add_iop_raw_data(&mut self, data: Vec<u8>) {
        self.iop_files.push(data);
    }

    /// Whether any raw pool data has been received.
    pub fn has_object_pools(&self) -> bool {
        !self.iop_files.is_empty()
    }

    /// Number of stored raw pool buffers.
    pub fn iop_file_count(&self) -> usize {
        self.iop_files.len()
    }

    /// Read one raw pool buffer.
    pub fn iop_file(&self, index: usize) -> Option<&[u8]> {
        self.iop_files.get(index).map(Vec::as_slice)
    }

    //==================================================================================Parse job

    /// Current parse job state.
    pub fn parse_state(&self) -> PoolParseState {
        self.parse_state
    }

    /// Request a parse of the stored pool data.
    pub fn start_parsing(&mut self) {
        self.parse_state = PoolParseState::Running;
    }

    /// Record the outcome of the parse job.
    pub fn finish_parsing(&mut self, result: Result<ObjectPool, u16>) {
        match result {
            Ok(parsed) => {
                self.pool.merge(parsed);
                self.parse_state = PoolParseState::Success;
            }
            Err(faulting_object_id) => {
                self.faulting_object_id = faulting_object_id;
                self.parse_state = PoolParseState::Fail;
            }
        }
    }

    /// Acknowledge a terminal parse state after the response went out.
    pub fn acknowledge_parse_result(&mut self) {
        self.parse_state = PoolParseState::Idle;
    }

    /// Object that failed parsing, when the last parse failed.
    pub fn faulting_object_id(&self) -> u16 {
        self.faulting_object_id
    }

    //==================================================================================Pool access

    /// Parsed object pool.
    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    /// Parsed object pool, mutable.
    pub fn pool_mut(&mut self) -> &mut ObjectPool {
        &mut self.pool
    }

    /// This working set's colour table.
    pub fn colour_table(&self) -> &VtColourTable {
        &self.colour_table
    }

    /// This working set's colour table, mutable.
    pub fn colour_table_mut(&mut self) -> &mut VtColourTable {
        &mut self.colour_table
    }

    //==================================================================================Maintenance

    /// Record a working set maintenance heartbeat.
    pub fn refresh_maintenance(&mut self, now_ms: u64) {
        self.maintenance_timestamp_ms = now_ms;
    }

    /// Timestamp of the last maintenance heartbeat.
    pub fn maintenance_timestamp_ms(&self) -> u64 {
        self.maintenance_timestamp_ms
    }
}
