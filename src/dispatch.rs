//! The (opcode × state) dispatch table.
//!
//! One table sized by the full state superset serves both roles; the cells a
//! role never reaches stay on [`Handler::Unexpected`]. Dispatch is a pair of
//! array indexes followed by a match on the handler tag, so there is no
//! virtual call and no per-packet allocation.

use crate::node::{Role, State, STATE_COUNT};
use crate::wire::{Opcode, OPCODE_COUNT};

/// Tags naming the node's packet handlers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    /// Log-and-drop stub for cells no flow should reach.
    Unexpected,
    /// Master side: a peer confirmed itself as our slave.
    SlaveJoined,
    /// Master side: answer a `master_needed_req` and count the sender in.
    MasterNeeded,
    /// Control: answer a peer's `slave_needed_req` with `i_am_master_rsp`.
    AssertMastership,
    /// Control: another node announced mastership.
    RivalMaster,
    /// Master side: accumulate a slave's `get_data_rsp`.
    CollectReading,
    /// Indication election: note a candidate with a greater identifier.
    NoteGreaterCandidate,
    /// Indication holding mastership: yield to a permanent master announce.
    AcceptPermanentMaster,
    /// Indication waiting for a master: adopt the announcing master.
    AcceptMaster,
    /// Indication waiting for a master: adopt the `slave_needed` sender and
    /// confirm with `i_am_slave_rsp`.
    JoinNewMaster,
    /// Indication slave: tie-break a new candidate against the current master.
    MaybeSwitchMaster,
    /// Indication holding mastership: tie-break a candidate against own id.
    MaybeYieldMastership,
    /// Slave: answer our master's poll with a fresh reading.
    AnswerPoll,
    /// Slave: render our master's `set_data` payload.
    ApplyDisplay,
}

pub type DispatchTable = [[Handler; STATE_COUNT]; OPCODE_COUNT];

/// Build the table for one role.
pub fn build_table(role: Role) -> DispatchTable {
    use Handler::*;

    let mut table = [[Unexpected; STATE_COUNT]; OPCODE_COUNT];

    let ws = State::WaitingForSlave as usize;
    let ma = State::Master as usize;
    let wm = State::WaitingForMaster as usize;
    let sl = State::Slave as usize;

    // Master-side cells, identical for both roles (an indication node runs
    // them once it holds temporary mastership).
    for state in [ws, ma] {
        table[Opcode::MasterNeededReq as usize][state] = MasterNeeded;
        table[Opcode::IAmSlaveRsp as usize][state] = SlaveJoined;
    }
    table[Opcode::GetDataRsp as usize][ma] = CollectReading;

    match role {
        Role::Control => {
            for state in [ws, ma] {
                table[Opcode::SlaveNeededReq as usize][state] = AssertMastership;
                table[Opcode::IAmMasterRsp as usize][state] = RivalMaster;
            }
        }
        Role::Indication => {
            for state in [wm, sl] {
                table[Opcode::MasterNeededReq as usize][state] = NoteGreaterCandidate;
            }
            for state in [ws, ma] {
                table[Opcode::IAmMasterRsp as usize][state] = AcceptPermanentMaster;
                table[Opcode::SlaveNeededReq as usize][state] = MaybeYieldMastership;
            }
            table[Opcode::IAmMasterRsp as usize][wm] = AcceptMaster;
            table[Opcode::SlaveNeededReq as usize][wm] = JoinNewMaster;
            table[Opcode::SlaveNeededReq as usize][sl] = MaybeSwitchMaster;
            table[Opcode::GetDataReq as usize][sl] = AnswerPoll;
            table[Opcode::SetData as usize][sl] = ApplyDisplay;
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(table: &DispatchTable, op: Opcode, state: State) -> Handler {
        table[op as usize][state as usize]
    }

    #[test]
    fn control_table_never_leaves_master_side() {
        let table = build_table(Role::Control);

        assert_eq!(cell(&table, Opcode::SlaveNeededReq, State::WaitingForSlave), Handler::AssertMastership);
        assert_eq!(cell(&table, Opcode::SlaveNeededReq, State::Master), Handler::AssertMastership);
        assert_eq!(cell(&table, Opcode::IAmMasterRsp, State::Master), Handler::RivalMaster);
        assert_eq!(cell(&table, Opcode::GetDataRsp, State::Master), Handler::CollectReading);

        // A control node never enters the two slave-side states.
        for op in 0..OPCODE_COUNT as u16 {
            let op = Opcode::from_u16(op).unwrap();
            assert_eq!(cell(&table, op, State::WaitingForMaster), Handler::Unexpected);
            assert_eq!(cell(&table, op, State::Slave), Handler::Unexpected);
        }
    }

    #[test]
    fn indication_table_covers_both_sides() {
        let table = build_table(Role::Indication);

        assert_eq!(cell(&table, Opcode::MasterNeededReq, State::WaitingForMaster), Handler::NoteGreaterCandidate);
        assert_eq!(cell(&table, Opcode::MasterNeededReq, State::Master), Handler::MasterNeeded);
        assert_eq!(cell(&table, Opcode::IAmMasterRsp, State::WaitingForMaster), Handler::AcceptMaster);
        assert_eq!(cell(&table, Opcode::IAmMasterRsp, State::Master), Handler::AcceptPermanentMaster);
        assert_eq!(cell(&table, Opcode::IAmMasterRsp, State::Slave), Handler::Unexpected);
        assert_eq!(cell(&table, Opcode::SlaveNeededReq, State::WaitingForMaster), Handler::JoinNewMaster);
        assert_eq!(cell(&table, Opcode::SlaveNeededReq, State::Slave), Handler::MaybeSwitchMaster);
        assert_eq!(cell(&table, Opcode::SlaveNeededReq, State::Master), Handler::MaybeYieldMastership);
        assert_eq!(cell(&table, Opcode::GetDataReq, State::Slave), Handler::AnswerPoll);
        assert_eq!(cell(&table, Opcode::GetDataReq, State::Master), Handler::Unexpected);
        assert_eq!(cell(&table, Opcode::SetData, State::Slave), Handler::ApplyDisplay);
        assert_eq!(cell(&table, Opcode::GetDataRsp, State::Master), Handler::CollectReading);
    }
}
