//! The per-node protocol state machine.
//!
//! A node is pure state plus a dispatch table: it consumes validated
//! datagrams and timer expirations, and emits encoded frames and timer
//! commands through small queues the event loop drains. Keeping the machine
//! free of sockets and clocks lets the election logic run deterministically
//! under test.
//!
//! # Election summary
//!
//! A control node asks for slaves and holds mastership permanently. An
//! indication node asks for a master first; if nobody answers and no peer
//! with a greater identifier spoke up, it promotes itself to temporary
//! master until a permanent one appears. Ties are broken by the greatest
//! 128-bit block identifier.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::{build_table, DispatchTable, Handler};
use crate::display::{render_temperature, render_text, render_time, ConsoleDisplay, DisplaySink};
use crate::sensor::{RandomSensor, SensorSource};
use crate::timer::{TimerArm, TimerPurpose};
use crate::wire::{self, BlockId, DisplayData, Frame, Mode, Opcode, SensorData};

// =============================================================================
// PROTOCOL CONSTANTS
// =============================================================================

/// UDP port every cluster node binds and multicasts on.
pub const CLUSTER_PORT: u16 = 30001;

/// Delay between `slave_needed_req` transmissions.
pub const SLAVE_NEEDED_INTERVAL: Duration = Duration::from_secs(3);

/// Total `slave_needed_req` transmissions before settling down to wait.
pub const SLAVE_NEEDED_ATTEMPTS: u32 = 2;

/// Delay between `master_needed_req` transmissions.
pub const MASTER_NEEDED_INTERVAL: Duration = Duration::from_secs(1);

/// Total `master_needed_req` transmissions before the oldest candidate
/// promotes itself.
pub const MASTER_NEEDED_ATTEMPTS: u32 = 3;

/// Master poll period; one `get_data_req` per cycle.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Completed poll cycles between consecutive `set_data` broadcasts.
pub const SET_DATA_CYCLES: u32 = 6;

/// Slave-side watchdog: re-enter the election after this long without a
/// poll from the current master.
pub const MASTER_LIVENESS_TIMEOUT: Duration =
    Duration::from_secs(POLL_INTERVAL.as_secs() * SET_DATA_CYCLES as u64);

/// Informational text pushed to every display.
const DISPLAY_MESSAGE: &str = "Ambient conditions report for the light grid";

// =============================================================================
// ROLE AND STATE
// =============================================================================

/// Deployment role, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Permanent master candidate; publishes mode `master`.
    Control,
    /// Prefers slave; may hold temporary mastership as `tmp_master`.
    Indication,
}

impl Role {
    /// Mode this role publishes while holding (or seeking) mastership.
    pub fn master_mode(self) -> Mode {
        match self {
            Role::Control => Mode::Master,
            Role::Indication => Mode::TmpMaster,
        }
    }
}

/// Protocol state; the second index of the dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum State {
    WaitingForSlave = 0,
    Master = 1,
    WaitingForMaster = 2,
    Slave = 3,
}

/// Number of states; sizes the dispatch table.
pub const STATE_COUNT: usize = 4;

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::WaitingForSlave => "waiting_for_slave",
            State::Master => "master",
            State::WaitingForMaster => "waiting_for_master",
            State::Slave => "slave",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERRORS AND OUTPUT
// =============================================================================

/// Failures that stop a node for good.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Two permanent masters on one group cannot be reconciled.
    #[error("another control node is active on this group (peer id={0})")]
    DuplicateControlNode(BlockId),

    #[error("{0} is not a multicast group address")]
    NotMulticast(IpAddr),

    #[error("listen address {listen} and group {group} are different address families")]
    AddressFamilyMismatch { listen: IpAddr, group: IpAddr },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an outbound frame is headed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// The multicast group.
    Group,
    /// Unicast back to one peer.
    Peer(SocketAddr),
}

/// An encoded frame queued for transmission.
#[derive(Clone, Copy, Debug)]
pub struct Outgoing {
    pub target: Target,
    pub frame: Frame,
}

/// A validated inbound datagram, header pre-decoded.
struct Inbound<'a> {
    op: Opcode,
    mode: Mode,
    id: BlockId,
    src: SocketAddr,
    raw: &'a [u8],
}

// =============================================================================
// NODE
// =============================================================================

pub struct Node {
    role: Role,
    block_id: BlockId,
    state: State,
    mode: Mode,
    table: DispatchTable,

    /// Remaining transmissions in the current retry sequence.
    attempts: u32,

    // Master-side bookkeeping.
    responses: u32,
    temperature_sum: i32,
    brightness_sum: i32,
    sample_count: i32,
    set_data_cycles: u32,
    for_slaves: DisplayData,

    // Slave-side bookkeeping.
    master_block_id: BlockId,
    master_mode: Mode,
    oldest: bool,
    reading: SensorData,

    sensor: Box<dyn SensorSource>,
    display: Box<dyn DisplaySink>,

    outbox: VecDeque<Outgoing>,
    timer: Option<TimerArm>,
}

impl Node {
    /// Node with a fresh random identifier and the reference sensor/display.
    pub fn new(role: Role) -> Self {
        Self::with_parts(role, BlockId::generate(), Box::new(RandomSensor), Box::new(ConsoleDisplay))
    }

    /// Fully injected constructor, used by tests and embedders.
    pub fn with_parts(
        role: Role,
        block_id: BlockId,
        sensor: Box<dyn SensorSource>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        let (state, mode) = match role {
            Role::Control => (State::WaitingForSlave, Mode::Master),
            Role::Indication => (State::WaitingForMaster, Mode::TmpMaster),
        };
        Node {
            role,
            block_id,
            state,
            mode,
            table: build_table(role),
            attempts: 0,
            responses: 0,
            temperature_sum: 0,
            brightness_sum: 0,
            sample_count: 0,
            set_data_cycles: 0,
            for_slaves: DisplayData::default(),
            master_block_id: BlockId::nil(),
            master_mode: Mode::Master,
            oldest: true,
            reading: SensorData::default(),
            sensor,
            display,
            outbox: VecDeque::new(),
            timer: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Identifier of the currently adopted master; nil while none.
    pub fn master_block_id(&self) -> BlockId {
        self.master_block_id
    }

    /// Mode the currently adopted master was last seen publishing.
    pub fn master_mode(&self) -> Mode {
        self.master_mode
    }

    /// True while no peer with a greater identifier spoke up this election.
    pub fn is_oldest(&self) -> bool {
        self.oldest
    }

    /// Kick off the election sequence for this role.
    pub fn start(&mut self) {
        info!("node id={} role={:?} starting", self.block_id, self.role);
        match self.role {
            Role::Control => self.send_slave_needed(),
            Role::Indication => self.send_master_needed(),
        }
    }

    /// Next frame to put on the wire, in enqueue order.
    pub fn take_outgoing(&mut self) -> Option<Outgoing> {
        self.outbox.pop_front()
    }

    /// Pending timer command; arming replaces whatever was scheduled.
    pub fn take_timer(&mut self) -> Option<TimerArm> {
        self.timer.take()
    }

    // -------------------------------------------------------------------------
    // Inbound dispatch
    // -------------------------------------------------------------------------

    /// Validate one datagram and run the (opcode, state) handler.
    pub fn handle_datagram(&mut self, datagram: &[u8], src: SocketAddr) -> Result<(), ClusterError> {
        if !wire::validate(datagram) {
            warn!("discarded packet from ip={}", src.ip());
            return Ok(());
        }

        let id = wire::decode_id(datagram);
        if id == self.block_id {
            // Our own multicast looped back.
            return Ok(());
        }

        let (Some(op), Some(mode)) = (wire::decode_op(datagram), wire::decode_mode(datagram))
        else {
            warn!("discarded packet from ip={}", src.ip());
            return Ok(());
        };

        let pkt = Inbound { op, mode, id, src, raw: datagram };
        match self.table[op as usize][self.state as usize] {
            Handler::Unexpected => self.unexpected(&pkt),
            Handler::SlaveJoined => self.on_slave_joined(&pkt),
            Handler::MasterNeeded => self.on_master_needed(&pkt),
            Handler::AssertMastership => self.on_assert_mastership(&pkt),
            Handler::RivalMaster => return self.on_rival_master(&pkt),
            Handler::CollectReading => self.on_collect_reading(&pkt),
            Handler::NoteGreaterCandidate => self.on_note_greater_candidate(&pkt),
            Handler::AcceptPermanentMaster => self.on_accept_permanent_master(&pkt),
            Handler::AcceptMaster => self.on_accept_master(&pkt),
            Handler::JoinNewMaster => self.on_join_new_master(&pkt),
            Handler::MaybeSwitchMaster => self.on_maybe_switch_master(&pkt),
            Handler::MaybeYieldMastership => self.on_maybe_yield_mastership(&pkt),
            Handler::AnswerPoll => self.on_answer_poll(&pkt),
            Handler::ApplyDisplay => self.on_apply_display(&pkt),
        }
        Ok(())
    }

    fn unexpected(&mut self, pkt: &Inbound) {
        warn!(
            "unexpected {} from ip={} id={} in state {}",
            pkt.op, pkt.src.ip(), pkt.id, self.state
        );
    }

    /// A peer confirmed itself as our slave; the first one carries a waiting
    /// node into mastership and starts the poll cycle.
    fn on_slave_joined(&mut self, pkt: &Inbound) {
        if self.state == State::WaitingForSlave {
            self.mode = self.role.master_mode();
            self.set_state(State::Master);
            // Primed so the first cycle expiry issues the first poll instead
            // of reading "no responses" and demoting.
            self.responses = 1;
            self.set_data_cycles = SET_DATA_CYCLES;
            self.arm(TimerPurpose::PollCycle, POLL_INTERVAL);
        }
        info!("slave present at ip={} id={}", pkt.src.ip(), pkt.id);
    }

    /// Somebody is looking for a master: count them in and answer.
    fn on_master_needed(&mut self, pkt: &Inbound) {
        self.on_slave_joined(pkt);
        self.push_header(Opcode::IAmMasterRsp, Target::Peer(pkt.src));
    }

    /// Control answering a candidate's `slave_needed_req`: the reply sends
    /// the candidate into the slave role.
    fn on_assert_mastership(&mut self, pkt: &Inbound) {
        self.push_header(Opcode::IAmMasterRsp, Target::Peer(pkt.src));
    }

    /// Control observing another master announcement. A temporary master is
    /// tolerated (it will yield); a second permanent master is fatal.
    fn on_rival_master(&mut self, pkt: &Inbound) -> Result<(), ClusterError> {
        if pkt.mode == Mode::TmpMaster {
            warn!(
                "unexpected i_am_master_rsp:tmp_master from ip={} id={}",
                pkt.src.ip(), pkt.id
            );
            return Ok(());
        }
        Err(ClusterError::DuplicateControlNode(pkt.id))
    }

    /// Fold one slave reading into the running averages.
    fn on_collect_reading(&mut self, pkt: &Inbound) {
        let data = SensorData::decode(pkt.raw);
        self.temperature_sum += i32::from(data.temperature);
        self.brightness_sum += i32::from(data.brightness);
        self.sample_count += 1;
        self.responses += 1;
        info!(
            "reading from ip={} id={}: temperature={} brightness={} (responses={})",
            pkt.src.ip(), pkt.id, data.temperature, data.brightness, self.responses
        );
    }

    /// Election observation: a candidate with a greater identifier disquali-
    /// fies us from self-promotion this round.
    fn on_note_greater_candidate(&mut self, pkt: &Inbound) {
        if pkt.id > self.block_id {
            self.oldest = false;
            info!(
                "candidate at ip={} id={} outranks local id={} in state {}",
                pkt.src.ip(), pkt.id, self.block_id, self.state
            );
        }
    }

    /// Adopt the sender as our master and start the liveness watchdog.
    fn on_accept_master(&mut self, pkt: &Inbound) {
        self.mode = Mode::Slave;
        self.set_state(State::Slave);
        self.master_block_id = pkt.id;
        // A master that is not permanent is tracked as temporary, whatever
        // mode its packet carried mid-election.
        self.master_mode = if pkt.mode == Mode::Master { Mode::Master } else { Mode::TmpMaster };
        self.attempts = 0;
        self.arm(TimerPurpose::MasterLiveness, MASTER_LIVENESS_TIMEOUT);
        info!(
            "new master at ip={} id={} mode={}",
            pkt.src.ip(), pkt.id, self.master_mode
        );
    }

    /// An indication node holding mastership yields only to a permanent
    /// master's announcement.
    fn on_accept_permanent_master(&mut self, pkt: &Inbound) {
        if pkt.mode == Mode::Master {
            self.on_accept_master(pkt);
        }
    }

    /// Adopt the `slave_needed_req` sender and confirm so it can start
    /// polling us.
    fn on_join_new_master(&mut self, pkt: &Inbound) {
        self.on_accept_master(pkt);
        self.push_header(Opcode::IAmSlaveRsp, Target::Peer(pkt.src));
    }

    /// A slave under a temporary master switches allegiance to a permanent
    /// master, or to a temporary candidate with a greater identifier.
    fn on_maybe_switch_master(&mut self, pkt: &Inbound) {
        if self.master_mode == Mode::TmpMaster
            && (pkt.id > self.master_block_id || pkt.mode == Mode::Master)
        {
            self.on_join_new_master(pkt);
        }
    }

    /// An indication node holding (or seeking) mastership steps down for a
    /// permanent master, or for a temporary candidate that outranks it.
    fn on_maybe_yield_mastership(&mut self, pkt: &Inbound) {
        if pkt.mode == Mode::Master || (pkt.mode == Mode::TmpMaster && pkt.id > self.block_id) {
            self.on_join_new_master(pkt);
        }
    }

    /// Our master polled: refresh the reading, feed the watchdog, reply.
    fn on_answer_poll(&mut self, pkt: &Inbound) {
        if pkt.id != self.master_block_id {
            return;
        }
        self.reading = self.sensor.sample();
        info!(
            "poll from master ip={} id={}: temperature={} brightness={}",
            pkt.src.ip(), pkt.id, self.reading.temperature, self.reading.brightness
        );
        self.arm(TimerPurpose::MasterLiveness, MASTER_LIVENESS_TIMEOUT);
        let reading = self.reading;
        self.push_sensor(Target::Peer(pkt.src), &reading);
    }

    /// Our master pushed a display payload: render it.
    fn on_apply_display(&mut self, pkt: &Inbound) {
        if pkt.id != self.master_block_id {
            return;
        }
        info!("display update from master ip={} id={}", pkt.src.ip(), pkt.id);
        let data = DisplayData::decode(pkt.raw);
        self.display.show(&data);
    }

    // -------------------------------------------------------------------------
    // Timer expirations
    // -------------------------------------------------------------------------

    /// Run the handler for an expired (not superseded) deadline.
    pub fn handle_timeout(&mut self, purpose: TimerPurpose) {
        match purpose {
            TimerPurpose::SlaveNeededRetry => self.on_slave_needed_timeout(),
            TimerPurpose::MasterNeededRetry => self.on_master_needed_timeout(),
            TimerPurpose::PollCycle => self.on_poll_cycle(),
            TimerPurpose::MasterLiveness => self.on_master_lost(),
        }
    }

    fn on_slave_needed_timeout(&mut self) {
        if self.state != State::WaitingForSlave {
            return;
        }
        self.attempts = self.attempts.saturating_sub(1);
        if self.attempts > 0 {
            self.push_header(Opcode::SlaveNeededReq, Target::Group);
            self.arm(TimerPurpose::SlaveNeededRetry, SLAVE_NEEDED_INTERVAL);
        }
        // Out of attempts: stay put and wait for a master_needed_req.
    }

    fn on_master_needed_timeout(&mut self) {
        if self.state != State::WaitingForMaster {
            return;
        }
        self.attempts = self.attempts.saturating_sub(1);
        if self.attempts > 0 {
            self.push_header(Opcode::MasterNeededReq, Target::Group);
            self.arm(TimerPurpose::MasterNeededRetry, MASTER_NEEDED_INTERVAL);
        } else if self.oldest {
            // Nobody outranked us and nobody answered: volunteer.
            self.send_slave_needed();
        }
        // Not the oldest: a greater candidate will promote itself and
        // broadcast for slaves.
    }

    /// One poll cycle elapsed. With responses in hand, average and poll
    /// again (plus the periodic display push); with none, give mastership up.
    fn on_poll_cycle(&mut self) {
        if self.state != State::Master {
            return;
        }
        if self.responses > 0 {
            self.calculate_average();
            self.responses = 0;
            self.push_header(Opcode::GetDataReq, Target::Group);
            self.arm(TimerPurpose::PollCycle, POLL_INTERVAL);
            self.set_data_cycles -= 1;
            if self.set_data_cycles == 0 {
                self.send_display_update();
            }
        } else {
            info!("no responses last cycle; giving up mastership");
            self.mode = self.role.master_mode();
            self.set_state(State::WaitingForSlave);
        }
    }

    /// The master went quiet for a whole cadence: re-enter the election.
    fn on_master_lost(&mut self) {
        self.send_master_needed();
    }

    // -------------------------------------------------------------------------
    // Send sequences
    // -------------------------------------------------------------------------

    /// Broadcast for slaves and start the retry schedule.
    fn send_slave_needed(&mut self) {
        self.mode = self.role.master_mode();
        self.set_state(State::WaitingForSlave);
        self.attempts = SLAVE_NEEDED_ATTEMPTS;
        self.push_header(Opcode::SlaveNeededReq, Target::Group);
        self.arm(TimerPurpose::SlaveNeededRetry, SLAVE_NEEDED_INTERVAL);
    }

    /// Broadcast for a master, resetting the election bookkeeping.
    fn send_master_needed(&mut self) {
        self.mode = Mode::Slave;
        self.set_state(State::WaitingForMaster);
        self.oldest = true;
        self.master_block_id = BlockId::nil();
        self.attempts = MASTER_NEEDED_ATTEMPTS;
        self.push_header(Opcode::MasterNeededReq, Target::Group);
        self.arm(TimerPurpose::MasterNeededRetry, MASTER_NEEDED_INTERVAL);
    }

    /// Fold the cycle's readings into the display payload and reset the
    /// accumulators for the next cycle.
    fn calculate_average(&mut self) {
        if self.sample_count > 0 {
            let brightness = self.brightness_sum.div_euclid(self.sample_count);
            let temperature = self.temperature_sum.div_euclid(self.sample_count);
            self.for_slaves.brightness = brightness as u16;
            render_temperature(temperature, &mut self.for_slaves.temperature);
            info!(
                "average over {} readings: temperature={:+} brightness={}",
                self.sample_count, temperature, brightness
            );
        }
        self.temperature_sum = 0;
        self.brightness_sum = 0;
        self.sample_count = 0;
    }

    /// Broadcast the display payload with a fresh timestamp and restart the
    /// cadence counter.
    fn send_display_update(&mut self) {
        render_time(&mut self.for_slaves.time);
        render_text(DISPLAY_MESSAGE, &mut self.for_slaves.text);
        let data = self.for_slaves;
        self.push_display(Target::Group, &data);
        self.set_data_cycles = SET_DATA_CYCLES;
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn set_state(&mut self, next: State) {
        info!("state {} -> {}", self.state, next);
        self.state = next;
    }

    fn arm(&mut self, purpose: TimerPurpose, after: Duration) {
        self.timer = Some(TimerArm { purpose, after });
    }

    fn push_header(&mut self, op: Opcode, target: Target) {
        let frame = Frame::header_only(op, self.mode, self.block_id);
        self.outbox.push_back(Outgoing { target, frame });
    }

    fn push_sensor(&mut self, target: Target, data: &SensorData) {
        let frame = Frame::with_sensor(Opcode::GetDataRsp, self.mode, self.block_id, data);
        self.outbox.push_back(Outgoing { target, frame });
    }

    fn push_display(&mut self, target: Target, data: &DisplayData) {
        let frame = Frame::with_display(Opcode::SetData, self.mode, self.block_id, data);
        self.outbox.push_back(Outgoing { target, frame });
    }
}
