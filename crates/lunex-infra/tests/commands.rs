// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command list lifecycle, pooling, parallel recording, compute and synchronization.

mod common;

use common::{context, flat_pipeline, FILL_SHADER, BACKENDS};
use lunex_core::math::LinearRgba;
use lunex_core::renderer::traits::KernelInvocation;
use lunex_core::renderer::{
    BackendKind, BufferDesc, BufferType, BufferUsage, ClearValue, CommandListState,
    CommandPoolConfig, ComputePipelineDesc, FramebufferDesc, Resource, ResourceState, TextureDesc,
    TextureFormat, TextureRegion,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// CommandList state machine
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_command_list_lifecycle() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc::new(8, 8).add_color_attachment(TextureFormat::RGBA8))
            .unwrap();
        let pipeline = flat_pipeline(device, LinearRgba::WHITE);

        let mut cmd = device.create_command_list("lifecycle");
        assert_eq!(cmd.state(), CommandListState::Initial);
        cmd.begin();
        assert!(cmd.is_recording());
        cmd.begin_render_pass(&framebuffer, &[ClearValue::Color(LinearRgba::BLACK)]);
        cmd.set_pipeline(&pipeline);
        assert!(cmd.in_render_pass());
        assert_eq!(cmd.bound_pipeline(), Some(pipeline.handle()));

        // `end` closes the pass left open.
        cmd.end();
        assert_eq!(cmd.state(), CommandListState::Executable, "{kind}");
        assert!(!cmd.in_render_pass());

        // Recording into an executable list is ignored.
        let count = cmd.command_count();
        cmd.set_pipeline(&pipeline);
        assert_eq!(cmd.command_count(), count);

        cmd.begin();
        assert_eq!(cmd.state(), CommandListState::Recording);
        assert_eq!(cmd.bound_pipeline(), None);
        assert_eq!(cmd.command_count(), 0);

        cmd.reset();
        assert_eq!(cmd.state(), CommandListState::Initial);
    }
}

#[test]
fn test_submitting_a_recording_list_is_skipped() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let mut cmd = device.create_command_list("unfinished");
        cmd.begin();
        assert_eq!(device.queue().submit_one(&cmd, None).unwrap(), 0, "{kind}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pools
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_pool_reset_clears_bindings_and_respects_the_limit() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let pipeline = flat_pipeline(device, LinearRgba::WHITE);
        let framebuffer = device
            .create_framebuffer(&FramebufferDesc::new(4, 4).add_color_attachment(TextureFormat::RGBA8))
            .unwrap();
        let pool = device.create_command_pool(CommandPoolConfig {
            initial_pool_size: 2,
            max_pool_size: 3,
            thread_safe: true,
        });
        assert_eq!(pool.available_count(), 2);

        let lists: Vec<_> = (0..5).map(|_| pool.allocate()).collect();
        for list in &lists {
            let mut list = list.lock();
            list.begin();
            list.begin_render_pass(&framebuffer, &[]);
            list.set_pipeline(&pipeline);
        }
        assert_eq!(pool.in_use_count(), 5);
        assert_eq!(pool.total_allocated(), 5);

        pool.reset();
        assert_eq!(pool.in_use_count(), 0);
        assert!(pool.available_count() <= 3, "{kind}: pool grew past its limit");

        let fresh = pool.allocate();
        let fresh = fresh.lock();
        assert_eq!(fresh.state(), CommandListState::Initial);
        assert_eq!(fresh.bound_pipeline(), None);
        assert_eq!(fresh.bound_framebuffer(), None);
    }
}

#[test]
fn test_parallel_recorder_submits_one_full_batch() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 16);
        let buffer = device.create_buffer(desc, None).unwrap();
        let recorder = device.create_parallel_recorder(Some(4));
        let fence = device.create_fence(false);

        let submitted = recorder
            .record_parallel(
                |worker, list| list.clear_buffer(&buffer, worker as u64 * 4, 4, worker as u32 + 1),
                Some(&fence),
            )
            .unwrap();
        assert_eq!(submitted, 4, "{kind}");
        assert_eq!(recorder.last_batch_size(), 4);
        assert!(fence.wait(Some(Duration::from_secs(5))));

        let words: Vec<u32> = buffer
            .get_all_data()
            .unwrap()
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words, vec![1, 2, 3, 4], "{kind}");
    }
}

#[test]
fn test_parallel_recorder_drops_an_incomplete_batch() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 12);
        let buffer = device.create_buffer(desc, None).unwrap();
        let recorder = device.create_parallel_recorder(Some(3));

        let submitted = recorder
            .record_parallel(
                |worker, list| {
                    list.clear_buffer(&buffer, worker as u64 * 4, 4, u32::MAX);
                    if worker == 1 {
                        list.reset();
                    }
                },
                None,
            )
            .unwrap();
        device.wait_idle();

        assert_eq!(submitted, 0, "{kind}");
        // On the immediate backend commands run while recording, so only the deferred
        // backend proves nothing reached the device.
        if kind == BackendKind::Deferred {
            assert_eq!(buffer.get_all_data().unwrap(), vec![0; 12]);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compute
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_dispatch_auto_rounds_up_to_whole_groups() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let shader = Arc::new(device.create_shader("fill", FILL_SHADER).unwrap());
        let groups = Arc::new(AtomicU32::new(0));
        let seen = groups.clone();
        let pipeline = device
            .create_compute_pipeline(ComputePipelineDesc::new(shader).with_kernel(
                move |inv: &mut KernelInvocation| seen.store(inv.groups()[0], Ordering::SeqCst),
            ))
            .unwrap();
        assert_eq!(pipeline.work_group_size(), [64, 1, 1]);
        assert_eq!(pipeline.group_count([100, 1, 1]), [2, 1, 1]);

        device
            .execute_immediate("fill", |cmd| {
                cmd.set_compute_pipeline(&pipeline);
                cmd.dispatch_auto(100, 1, 1);
            })
            .unwrap();
        assert_eq!(groups.load(Ordering::SeqCst), 2, "{kind}");
        assert_eq!(device.statistics().dispatches, 1);
        assert_eq!(device.executed_statistics().dispatches, 1);
    }
}

#[test]
fn test_kernels_write_back_storage() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let shader = Arc::new(device.create_shader("fill", FILL_SHADER).unwrap());
        let pipeline = device
            .create_compute_pipeline(ComputePipelineDesc::new(shader).with_kernel(
                |inv: &mut KernelInvocation| {
                    if let Some(data) = inv.storage_mut(0) {
                        data.fill(1);
                    }
                },
            ))
            .unwrap();
        let storage = device
            .create_storage_buffer(4, 4, None, BufferUsage::Dynamic)
            .unwrap();

        device
            .execute_immediate("fill", |cmd| {
                cmd.set_compute_pipeline(&pipeline);
                cmd.set_storage_buffer(0, &storage);
                cmd.dispatch(1, 1, 1);
            })
            .unwrap();
        let values: Vec<u32> = storage.read_elements().unwrap();
        assert_eq!(values, vec![0x0101_0101; 4], "{kind}");
    }
}

#[test]
fn test_dispatch_without_a_kernel_runs_the_shader() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let shader = Arc::new(device.create_shader("fill", FILL_SHADER).unwrap());
        let pipeline = device.create_compute_pipeline(ComputePipelineDesc::new(shader)).unwrap();
        let storage = device
            .create_storage_buffer(128, 4, None, BufferUsage::Dynamic)
            .unwrap();

        device
            .execute_immediate("fill", |cmd| {
                cmd.set_compute_pipeline(&pipeline);
                cmd.set_storage_buffer(0, &storage);
                cmd.dispatch(2, 1, 1);
            })
            .unwrap();
        device.wait_idle();
        let values: Vec<u32> = storage.read_elements().unwrap();
        assert_eq!(values, vec![1; 128], "{kind}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Copies
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_out_of_range_copy_regions_are_skipped() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let src = device.create_texture_2d(TextureDesc::texture_2d(4, 4, TextureFormat::RGBA8)).unwrap();
        let dst = device.create_texture_2d(TextureDesc::texture_2d(4, 4, TextureFormat::RGBA8)).unwrap();
        src.set_data(&TextureRegion::rect(0, 0, 4, 4), &[0xff; 64]).unwrap();

        device
            .execute_immediate("copies", |cmd| {
                cmd.copy_texture(&src, TextureRegion::rect(u32::MAX, 0, 2, 1), &dst, TextureRegion::rect(0, 0, 2, 1));
                cmd.copy_texture(&src, TextureRegion::rect(0, 0, 2, 1), &dst, TextureRegion::rect(3, u32::MAX, 2, 1));
            })
            .unwrap();
        device.wait_idle();
        assert_eq!(dst.get_data(&TextureRegion::rect(0, 0, 4, 4)).unwrap(), vec![0; 64], "{kind}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronization
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_deferred_fence_waits_for_the_queue() {
    let ctx = context(BackendKind::Deferred);
    let device = ctx.device();
    let shader = Arc::new(device.create_shader("gate", FILL_SHADER).unwrap());
    let (open, gate) = flume::bounded::<()>(1);
    let pipeline = device
        .create_compute_pipeline(ComputePipelineDesc::new(shader).with_kernel(
            move |_: &mut KernelInvocation| {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            },
        ))
        .unwrap();

    let mut cmd = device.create_command_list("gated");
    cmd.begin();
    cmd.set_compute_pipeline(&pipeline);
    cmd.dispatch(1, 1, 1);
    cmd.end();

    let fence = device.create_fence(false);
    device.queue().submit_one(&cmd, Some(&fence)).unwrap();
    assert!(!fence.is_signaled(), "the fence signaled before the queue ran the batch");

    open.send(()).unwrap();
    assert!(fence.wait(Some(Duration::from_secs(5))));
    assert!(fence.is_signaled());
    assert_eq!(fence.value(), 1);
}

#[test]
fn test_immediate_fence_signals_on_submit() {
    let ctx = context(BackendKind::Immediate);
    let device = ctx.device();
    let mut cmd = device.create_command_list("instant");
    cmd.begin();
    cmd.end();
    let fence = device.create_fence(false);
    device.queue().submit_one(&cmd, Some(&fence)).unwrap();
    assert!(fence.is_signaled());
}

#[test]
fn test_barrier_hazards_are_tracked_on_the_deferred_backend_only() {
    for kind in BACKENDS {
        let ctx = context(kind);
        let device = ctx.device();
        let desc = BufferDesc::new(BufferType::Storage, BufferUsage::Dynamic, 16);
        let buffer = device.create_buffer(desc, None).unwrap();

        device
            .execute_immediate("barriers", |cmd| {
                cmd.resource_barrier(&buffer, ResourceState::CopyDest, ResourceState::ShaderResource);
                // Claims CopyDest again although the buffer is now a shader resource.
                cmd.resource_barrier(&buffer, ResourceState::CopyDest, ResourceState::UnorderedAccess);
            })
            .unwrap();

        assert_eq!(device.statistics().barriers, 2);
        let executed = device.executed_statistics();
        assert_eq!(executed.barriers, 2, "{kind}");
        let expected = if kind == BackendKind::Deferred { 1 } else { 0 };
        assert_eq!(executed.hazards, expected, "{kind}");
    }
}
