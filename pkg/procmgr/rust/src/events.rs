// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::state::ProcessStatus;
use serde::Serialize;
use std::time::SystemTime;
use uuid::Uuid;

/// One applied lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub name: String,
    pub from: ProcessStatus,
    pub to: ProcessStatus,
    pub exit_code: Option<i32>,
    pub run_id: Option<Uuid>,
    pub timestamp: SystemTime,
}

impl LifecycleEvent {
    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}
