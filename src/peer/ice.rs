use crate::peer::types::IceCandidate;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

pub fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

pub fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

/// The `typ` field of a candidate line (`host`, `srflx`, `prflx`, `relay`)
pub fn candidate_type(candidate: &IceCandidate) -> Option<&str> {
    let mut parts = candidate.candidate.split_whitespace();
    while let Some(part) = parts.next() {
        if part == "typ" {
            return parts.next();
        }
    }
    None
}

/// Logs what kinds of local candidates a generation produced
pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let mut host_count = 0;
    let mut srflx_count = 0;
    let mut relay_count = 0;

    for candidate in candidates {
        match candidate_type(candidate) {
            Some("host") => host_count += 1,
            Some("srflx") | Some("prflx") => srflx_count += 1,
            Some("relay") => relay_count += 1,
            _ => {}
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        host_count, srflx_count, relay_count
    );

    if candidates.is_empty() {
        warn!("No local ICE candidates gathered, the receiver cannot reach us");
    }
}
