// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The narrow callback surface attached viewers consume.
//!
//! Viewers (terminal renderers) are external collaborators: the session
//! owns its viewer list and pushes screen snapshots and status updates
//! through these callbacks. No viewer holds a reference back into the
//! session; the id is the only handle.

use std::sync::Arc;

use crate::screen::ScreenSnapshot;
use crate::socket::AgentInfo;

/// Render callback: a fresh screen snapshot is available.
pub type OnScreen = Arc<dyn Fn(&ScreenSnapshot) + Send + Sync>;

/// Status callback: the periodic status tick or a lifecycle edge.
pub type OnState = Arc<dyn Fn(&AgentInfo) + Send + Sync>;

/// Callbacks a viewer registers with the session. All optional.
#[derive(Default, Clone)]
pub struct ViewerCallbacks {
    pub on_screen: Option<OnScreen>,
    pub on_state: Option<OnState>,
}

/// Viewer ids are handed out by the session; 0 is never issued.
pub type ViewerId = u64;

pub(crate) struct ViewerEntry {
    pub id: ViewerId,
    pub callbacks: ViewerCallbacks,
}
