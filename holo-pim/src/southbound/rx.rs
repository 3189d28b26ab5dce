//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use holo_utils::southbound::{
    FeaRequest, FeaResult, FeaUpdate, KernelSignalMsg, KernelSignalType,
};

use crate::error::Error;
use crate::instance::Instance;
use crate::southbound;
use crate::{events, mfc};

// Processes one update from the forwarding engine.
pub(crate) fn process_update(
    instance: &mut Instance,
    msg: FeaUpdate,
) -> Result<(), Error> {
    match msg {
        FeaUpdate::PacketRecv(msg) => {
            events::process_packet(instance, msg)?;
        }
        FeaUpdate::KernelSignal(msg) => {
            process_kernel_signal(instance, msg)?;
        }
        FeaUpdate::DataflowSignal(msg) => {
            let Some((mut instance, arenas)) = instance.as_up() else {
                return Ok(());
            };
            mfc::dataflow_signal(&mut instance, &arenas.interfaces, msg);
        }
        FeaUpdate::ProtocolRegistrationResult {
            protocol,
            vif_index,
            unregister,
            result,
        } => {
            let Some((mut instance, _)) = instance.as_up() else {
                return Ok(());
            };
            match result {
                FeaResult::Transient => {
                    // The forwarding engine is not ready yet; keep
                    // retrying with back-off while staying in Startup.
                    let request = if unregister {
                        FeaRequest::ProtocolUnregister {
                            protocol,
                            vif_index,
                        }
                    } else {
                        FeaRequest::ProtocolRegister {
                            protocol,
                            vif_index,
                        }
                    };
                    southbound::tx::retry_request(&instance.tx.fea, request);
                    return Ok(());
                }
                FeaResult::CommandFailed => {
                    Error::FeaRegistrationFailed(vif_index).log();
                }
                FeaResult::Success => (),
            }
            if unregister {
                instance.state.shutdown_request_completed();
            } else {
                instance.state.startup_request_completed();
            }
        }
        FeaUpdate::MfcResult {
            source,
            group,
            result,
        } => {
            // A rejected MFC or monitor request is logged and absorbed;
            // the derived state is re-pushed on the next recomputation.
            if result == FeaResult::CommandFailed {
                return Err(Error::FeaRequestRejected(source, group));
            }
        }
    }

    Ok(())
}

// Dispatches a kernel upcall.
fn process_kernel_signal(
    instance: &mut Instance,
    msg: KernelSignalMsg,
) -> Result<(), Error> {
    let Some((mut instance, arenas)) = instance.as_up() else {
        return Ok(());
    };

    match msg.signal_type {
        KernelSignalType::NoCache | KernelSignalType::WrongVif => {
            mfc::receive_data(
                &mut instance,
                &arenas.interfaces,
                msg.vif_index,
                msg.src,
                msg.dst,
            );
        }
        KernelSignalType::WholePacket => {
            mfc::wholepkt_signal(
                &mut instance,
                &arenas.interfaces,
                msg.src,
                msg.dst,
                msg.payload,
            );
        }
    }

    Ok(())
}
