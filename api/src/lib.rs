/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

pub mod proto {
    pub mod runtime {
        tonic::include_proto!("resourced.runtime");
    }
    pub mod agentconfig {
        tonic::include_proto!("resourced.agentconfig");
    }
}
