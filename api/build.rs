/*
 * SPDX-FileCopyrightText: Copyright 2024 LG Electronics Inc.
 * SPDX-License-Identifier: Apache-2.0
 */

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/runtime.proto")?;
    tonic_build::compile_protos("proto/agentconfig.proto")?;
    Ok(())
}
