// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The command envelope used for handler traffic.
//!
//! A read or write handler response travels across the admin boundary
//! as a postcard-encoded [`CmdResp`]. The envelope carries the API
//! version so a stale client is rejected before any payload decode.

use crate::SmeError;
use crate::API_VERSION;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

/// Marker for types that may be returned as a successful handler
/// response.
pub trait CmdOk: core::fmt::Debug + Serialize {}

// A handler that returns nothing.
impl CmdOk for () {}

/// The result of running a handler.
pub type CmdResult<T> = Result<T, SmeError>;

/// The on-wire envelope of a handler response.
#[derive(Debug, Deserialize, Serialize)]
pub struct CmdResp {
    pub api_version: u64,
    pub body: Result<Vec<u8>, SmeError>,
}

/// Encode a successful handler response.
pub fn encode_resp<T: CmdOk>(val: &T) -> Result<Vec<u8>, SmeError> {
    let body = postcard::to_allocvec(val)
        .map_err(|e| SmeError::SerCmdResp(e.to_string()))?;
    let resp = CmdResp { api_version: API_VERSION, body: Ok(body) };
    postcard::to_allocvec(&resp).map_err(|e| SmeError::SerCmdResp(e.to_string()))
}

/// Encode a failed handler response.
pub fn encode_err(err: SmeError) -> Result<Vec<u8>, SmeError> {
    let resp = CmdResp { api_version: API_VERSION, body: Err(err) };
    postcard::to_allocvec(&resp).map_err(|e| SmeError::SerCmdResp(e.to_string()))
}

/// Decode a handler response, verifying the API version before the
/// body is touched.
pub fn decode_resp<T: CmdOk + DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, SmeError> {
    let resp: CmdResp = postcard::from_bytes(bytes)
        .map_err(|e| SmeError::DeserCmdReq(e.to_string()))?;

    if resp.api_version != API_VERSION {
        return Err(SmeError::BadApiVersion {
            user: resp.api_version,
            engine: API_VERSION,
        });
    }

    match resp.body {
        Ok(body) => postcard::from_bytes(&body)
            .map_err(|e| SmeError::DeserCmdReq(e.to_string())),
        Err(e) => Err(e),
    }
}
