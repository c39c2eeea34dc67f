//! In-memory transport with scripted replies, for exercising device handlers
//! without hardware.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use scst_scsi::{
    ExecError, ExecRequest, ScsiDeviceInfo, ScsiTransport,
    commands::{
        Direction,
        inquiry::{PeripheralDeviceType, ScsiLevel},
    },
    sense::{SenseData, SenseKey},
};

/// How the scripted device answers one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// GOOD status; the bytes are copied into the data buffer and a shorter
    /// reply shows up as a short transfer.
    Data(Vec<u8>),
    /// CHECK CONDITION with fixed-format sense.
    Sense(SenseKey, u8, u8),
    /// Another non-GOOD status.
    Status(u8),
    Timeout,
}

/// One command as the transport saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub cdb: Vec<u8>,
    pub direction: Direction,
    pub buffer_len: usize,
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Default)]
struct Script {
    queued: HashMap<u8, VecDeque<Reply>>,
    sticky: HashMap<u8, Reply>,
    log: Vec<Executed>,
}

pub struct ScriptedTransport {
    info: ScsiDeviceInfo,
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new(info: ScsiDeviceInfo) -> Self {
        Self {
            info,
            script: Mutex::new(Script::default()),
        }
    }

    /// A SPC-3 CD-ROM at LUN 0.
    pub fn cdrom() -> Self {
        Self::new(ScsiDeviceInfo {
            device_type: PeripheralDeviceType::CdRomDevice,
            scsi_level: ScsiLevel::SCSI_SPC_3,
            lun: 0,
        })
    }

    /// Queue a reply for the next command with `opcode`.
    pub fn push(&self, opcode: u8, reply: Reply) {
        self.script()
            .queued
            .entry(opcode)
            .or_default()
            .push_back(reply);
    }

    /// Reply used for `opcode` once its queue is empty. Without one, the
    /// device answers ILLEGAL REQUEST / INVALID COMMAND OPERATION CODE.
    pub fn always(&self, opcode: u8, reply: Reply) {
        self.script().sticky.insert(opcode, reply);
    }

    pub fn log(&self) -> Vec<Executed> {
        self.script().log.clone()
    }

    /// How many commands with `opcode` were executed.
    pub fn executed(&self, opcode: u8) -> usize {
        self.script()
            .log
            .iter()
            .filter(|exec| exec.cdb.first() == Some(&opcode))
            .count()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScsiTransport for ScriptedTransport {
    fn info(&self) -> ScsiDeviceInfo {
        self.info
    }

    fn execute(&self, request: ExecRequest<'_>) -> Result<usize, ExecError> {
        let opcode = request.cdb.first().copied().unwrap_or(0);

        let reply = {
            let mut script = self.script();
            script.log.push(Executed {
                cdb: request.cdb.to_vec(),
                direction: request.direction,
                buffer_len: request.buffer.len(),
                timeout: request.timeout,
                retries: request.retries,
            });
            let queued = script.queued.get_mut(&opcode).and_then(VecDeque::pop_front);
            match queued {
                Some(reply) => reply,
                None => script
                    .sticky
                    .get(&opcode)
                    .cloned()
                    .unwrap_or(Reply::Sense(SenseKey::IllegalRequest, 0x20, 0x00)),
            }
        };

        match reply {
            Reply::Data(data) => {
                let len = data.len().min(request.buffer.len());
                request.buffer[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Reply::Sense(key, asc, ascq) => {
                let sense = SenseData {
                    key,
                    asc,
                    ascq,
                    descriptor: false,
                }
                .to_fixed();
                let len = sense.len().min(request.sense.len());
                request.sense[..len].copy_from_slice(&sense[..len]);
                Err(ExecError::CheckCondition)
            }
            Reply::Status(status) => Err(ExecError::Status(status)),
            Reply::Timeout => Err(ExecError::Timeout),
        }
    }
}
