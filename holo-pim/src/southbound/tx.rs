//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::time::Duration;

use holo_utils::mifset::Mifset;
use holo_utils::southbound::{
    DataflowMonitorMsg, DataflowSignalMsg, FeaRequest, FeaRequestSender,
    PacketSendMsg,
};
use holo_utils::task::Task;

use crate::instance::{Instance, InstanceUpView};

// Delay before a transiently failed request is issued again.
const RETRY_DELAY: Duration = Duration::from_secs(1);

// Asks the forwarding engine to deliver PIM packets from a vif.
pub(crate) fn protocol_register(
    instance: &mut InstanceUpView<'_>,
    vif_index: u16,
) {
    instance.state.startup_request_sent();
    let _ = instance.tx.fea.send(FeaRequest::ProtocolRegister {
        protocol: Instance::PROTOCOL,
        vif_index,
    });
}

// Stops delivery of PIM packets from a vif.
pub(crate) fn protocol_unregister(
    instance: &mut InstanceUpView<'_>,
    vif_index: u16,
) {
    instance.state.shutdown_request_sent();
    let _ = instance.tx.fea.send(FeaRequest::ProtocolUnregister {
        protocol: Instance::PROTOCOL,
        vif_index,
    });
}

// Joins a multicast group on a vif at the link layer.
pub(crate) fn join_multicast_group(
    instance: &InstanceUpView<'_>,
    vif_index: u16,
    group: IpAddr,
) {
    let _ = instance
        .tx
        .fea
        .send(FeaRequest::JoinMulticastGroup { vif_index, group });
}

// Leaves a multicast group on a vif at the link layer.
pub(crate) fn leave_multicast_group(
    instance: &InstanceUpView<'_>,
    vif_index: u16,
    group: IpAddr,
) {
    let _ = instance
        .tx
        .fea
        .send(FeaRequest::LeaveMulticastGroup { vif_index, group });
}

// Hands one PIM packet to the forwarding engine for transmission.
pub(crate) fn packet_send(
    instance: &InstanceUpView<'_>,
    msg: PacketSendMsg,
) {
    let _ = instance.tx.fea.send(FeaRequest::PacketSend(msg));
}

// Programs one forwarding cache entry.
//
// All MFC operations travel over the same ordered channel, so a delete
// can never overtake the install that preceded it.
pub(crate) fn mfc_add(
    instance: &InstanceUpView<'_>,
    source: IpAddr,
    group: IpAddr,
    iif_vif_index: u16,
    olist: Mifset,
    olist_disable_wrongvif: Mifset,
    rp_addr: IpAddr,
    distance: u32,
) {
    let _ = instance.tx.fea.send(FeaRequest::MfcAdd(
        holo_utils::southbound::MfcAddMsg {
            source,
            group,
            iif_vif_index,
            olist,
            olist_disable_wrongvif,
            rp_addr,
            distance,
        },
    ));
}

// Removes one forwarding cache entry.
pub(crate) fn mfc_delete(
    instance: &InstanceUpView<'_>,
    source: IpAddr,
    group: IpAddr,
) {
    let _ = instance
        .tx
        .fea
        .send(FeaRequest::MfcDelete { source, group });
}

// Arms one dataflow monitor.
pub(crate) fn dataflow_monitor_add(
    instance: &InstanceUpView<'_>,
    source: IpAddr,
    group: IpAddr,
    threshold_interval_sec: u32,
    threshold_packets: u32,
    threshold_bytes: u32,
    is_threshold_in_packets: bool,
    is_threshold_in_bytes: bool,
    is_geq_upcall: bool,
    is_leq_upcall: bool,
) {
    let _ = instance.tx.fea.send(FeaRequest::DataflowMonitorAdd(
        DataflowMonitorMsg {
            source,
            group,
            threshold_interval_sec,
            threshold_packets,
            threshold_bytes,
            is_threshold_in_packets,
            is_threshold_in_bytes,
            is_geq_upcall,
            is_leq_upcall,
        },
    ));
}

// Removes the dataflow monitor that produced the given signal.
pub(crate) fn dataflow_monitor_delete(
    instance: &InstanceUpView<'_>,
    signal: &DataflowSignalMsg,
) {
    let _ = instance.tx.fea.send(FeaRequest::DataflowMonitorDelete(
        DataflowMonitorMsg {
            source: signal.source,
            group: signal.group,
            threshold_interval_sec: signal.threshold_interval_sec,
            threshold_packets: signal.threshold_packets,
            threshold_bytes: signal.threshold_bytes,
            is_threshold_in_packets: signal.is_threshold_in_packets,
            is_threshold_in_bytes: signal.is_threshold_in_bytes,
            is_geq_upcall: signal.is_geq_upcall,
            is_leq_upcall: signal.is_leq_upcall,
        },
    ));
}

// Removes all dataflow monitors of a flow.
pub(crate) fn dataflow_monitor_delete_all(
    instance: &InstanceUpView<'_>,
    source: IpAddr,
    group: IpAddr,
) {
    let _ = instance
        .tx
        .fea
        .send(FeaRequest::DataflowMonitorDeleteAll { source, group });
}

// Issues a request again after a transient failure.
pub(crate) fn retry_request(fea: &FeaRequestSender, request: FeaRequest) {
    #[cfg(not(feature = "testing"))]
    {
        let fea = fea.clone();
        let mut task = Task::spawn(async move {
            tokio::time::sleep(RETRY_DELAY).await;
            let _ = fea.send(request);
        });
        task.detach();
    }
    #[cfg(feature = "testing")]
    {
        let _ = (fea, request);
    }
}
