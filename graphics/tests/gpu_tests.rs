//! Integration tests for command recording and submission.
//!
//! Tests are parameterized using `rstest` to run against multiple backends.
//! Cases for a backend that is not compiled in, or has no device on this
//! machine, return early.
//!
//! # Test Categories
//!
//! - **Transfer Tests**: buffer copies and image uploads through the queue
//! - **Queue Tests**: command buffer lifecycle, replay and priority work
//! - **Pass Tests**: render pass caching and target binding
//! - **Draw Tests**: full draw validation against the dummy backend
//!
//! ```bash
//! cargo test --test gpu_tests
//! ```

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::rstest;

use cmdgfx::backend::{DummyFailure, RecordedCommand};
use cmdgfx::{
    AttachmentOp, BufferUsage, CmdBufferState, ComputeEncoder, ComputeStateConfig, DcEntry,
    DcType, Extent3d, Format, GraphicsEncoder, GraphicsError, GraphicsStateConfig, ImageRegion,
    ImageUsage, IndexType, Origin3d, PipelineStage, ScissorRect, ShaderStage, TargetOp,
    TransferEncoder, VertexAttribute, VertexInput, Viewport,
};
use common::{Backend, TestContext, generate_test_pattern};

// ============================================================================
// Transfer Tests
// ============================================================================

/// Copy a buffer through a second one and read it back.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_buffer_copy_roundtrip(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    const BUFFER_SIZE: u64 = 1024;
    let test_data = generate_test_pattern(BUFFER_SIZE as usize);

    let staging = ctx.create_buffer(BUFFER_SIZE, BufferUsage::COPY_SRC);
    let gpu = ctx.create_buffer(BUFFER_SIZE, BufferUsage::COPY_SRC | BufferUsage::COPY_DST);
    let readback = ctx.create_buffer(BUFFER_SIZE, BufferUsage::COPY_DST);
    staging.write(0, &test_data).unwrap();

    let mut encoder = TransferEncoder::new();
    encoder
        .copy_buffer(&staging, 0, &gpu, 0, BUFFER_SIZE)
        .synchronize()
        .copy_buffer(&gpu, 0, &readback, 0, BUFFER_SIZE);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();

    assert_eq!(cmd.executions(), 1);
    assert_eq!(readback.read(0, BUFFER_SIZE).unwrap(), test_data);
}

/// Partial copies land at the requested offsets.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_buffer_copy_with_offsets(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let src = ctx.create_buffer(64, BufferUsage::COPY_SRC);
    let dst = ctx.create_buffer(64, BufferUsage::COPY_DST);
    src.write(16, &[9; 8]).unwrap();
    dst.write(0, &[0; 64]).unwrap();

    let mut encoder = TransferEncoder::new();
    encoder.copy_buffer(&src, 16, &dst, 40, 8);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();

    let bytes = dst.read(0, 64).unwrap();
    assert!(bytes[..40].iter().all(|b| *b == 0));
    assert_eq!(&bytes[40..48], &[9; 8]);
    assert!(bytes[48..].iter().all(|b| *b == 0));
}

/// A copy that runs past either buffer is rejected before anything runs.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_out_of_range_copy_rejected(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let src = ctx.create_buffer(32, BufferUsage::COPY_SRC);
    let dst = ctx.create_buffer(16, BufferUsage::COPY_DST);
    let mut encoder = TransferEncoder::new();
    encoder.copy_buffer(&src, 0, &dst, 0, 32);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    let err = cmd.encode(&encoder).unwrap_err();
    assert!(matches!(err, GraphicsError::OutOfBounds { .. }));
    assert_eq!(cmd.state(), CmdBufferState::Fresh);
    assert!(cmd.enqueue().is_err());
    queue.submit().unwrap();
}

/// Image uploads go through the priority buffer and land with the next submit.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_image_upload_and_copy(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let usage = ImageUsage::COPY_DST | ImageUsage::COPY_SRC | ImageUsage::SAMPLED;
    let source = ctx.create_image(8, 8, Format::Rgba8Unorm, usage);
    let copy = ctx.create_image(8, 8, Format::Rgba8Unorm, usage);
    let texels = generate_test_pattern(8 * 8 * 4);
    source
        .write(Origin3d::default(), 0, 0, Extent3d::new_2d(8, 8), &texels)
        .unwrap();

    let mut encoder = TransferEncoder::new();
    encoder.copy_image(
        ImageRegion::new(Arc::clone(&source), 0, 0, Origin3d::default()),
        ImageRegion::new(Arc::clone(&copy), 0, 0, Origin3d::default()),
        Extent3d::new_2d(8, 8),
        1,
    );

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();
    assert_eq!(cmd.executions(), 1);

    if let Some(dummy) = &ctx.dummy {
        let batches = &dummy.submissions()[0];
        assert_eq!(batches.len(), 2, "priority upload goes in its own batch");
        assert_eq!(batches[1].wait.len(), 1);
        assert_eq!(batches[1].wait[0].0, batches[0].signal[0]);
    }
}

/// Uploads with the wrong size never reach the priority buffer.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_image_upload_size_mismatch(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let image = ctx.create_image(4, 4, Format::Rgba8Unorm, ImageUsage::COPY_DST);
    let result = image.write(Origin3d::default(), 0, 0, Extent3d::new_2d(4, 4), &[0; 12]);
    assert!(result.is_err());
    ctx.device.default_queue().submit().unwrap();

    if let Some(dummy) = &ctx.dummy {
        assert_eq!(dummy.stats().submits, 0);
    }
}

// ============================================================================
// Queue Tests
// ============================================================================

/// An encoder can be replayed into the same buffer across submits.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_command_buffer_replay(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let src = ctx.create_buffer(16, BufferUsage::COPY_SRC);
    let dst = ctx.create_buffer(16, BufferUsage::COPY_DST);
    let mut encoder = TransferEncoder::new();
    encoder.copy_buffer(&src, 0, &dst, 0, 16);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    for round in 1..=3u8 {
        src.write(0, &[round; 16]).unwrap();
        cmd.encode(&encoder).unwrap();
        cmd.enqueue().unwrap();
        assert!(cmd.is_pending());
        assert!(cmd.encode(&encoder).is_err(), "pending buffers reject encoding");
        queue.submit().unwrap();
        assert_eq!(cmd.state(), CmdBufferState::Executed);
        assert_eq!(dst.read(0, 16).unwrap(), vec![round; 16]);
    }
    assert_eq!(cmd.executions(), 3);
}

/// Several buffers enqueued before a submit run together.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_submit_runs_every_pending_buffer(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let src = ctx.create_buffer(4, BufferUsage::COPY_SRC);
    src.write(0, &[1, 2, 3, 4]).unwrap();
    let targets: Vec<_> = (0..3)
        .map(|_| ctx.create_buffer(4, BufferUsage::COPY_DST))
        .collect();

    let queue = ctx.device.default_queue();
    let mut cmds = Vec::new();
    for target in &targets {
        let mut encoder = TransferEncoder::new();
        encoder.copy_buffer(&src, 0, target, 0, 4);
        let mut cmd = queue.cmd_buffer().unwrap();
        cmd.encode(&encoder).unwrap();
        cmd.enqueue().unwrap();
        cmds.push(cmd);
    }
    assert_eq!(queue.pending_count(), 3);
    queue.submit().unwrap();
    assert_eq!(queue.pending_count(), 0);

    for (cmd, target) in cmds.iter().zip(&targets) {
        assert_eq!(cmd.executions(), 1);
        assert_eq!(target.read(0, 4).unwrap(), vec![1, 2, 3, 4]);
    }
}

/// Completion handlers of priority work run once with the submit outcome.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_priority_completion(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let src = ctx.create_buffer(8, BufferUsage::COPY_SRC);
    let dst = ctx.create_buffer(8, BufferUsage::COPY_DST);
    src.write(0, &[5; 8]).unwrap();
    let mut encoder = TransferEncoder::new();
    encoder.copy_buffer(&src, 0, &dst, 0, 8);

    let completed = Arc::new(AtomicUsize::new(0));
    let queue = ctx.device.default_queue();
    {
        let completed = Arc::clone(&completed);
        let priority = queue
            .priority(
                PipelineStage::TRANSFER,
                Box::new(move |success| {
                    assert!(success);
                    completed.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        priority.encode(&encoder).unwrap();
    }
    queue.submit().unwrap();
    queue.submit().unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(dst.read(0, 8).unwrap(), vec![5; 8]);
}

/// A priority handle goes stale once its buffer has been submitted.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_stale_priority_handle(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let queue = ctx.device.default_queue();
    let priority = queue
        .priority(PipelineStage::TRANSFER, Box::new(|_| {}))
        .unwrap();
    queue.submit().unwrap();

    let err = priority.encode(&TransferEncoder::new()).unwrap_err();
    assert!(matches!(err, GraphicsError::InvalidState(_)));
}

/// A failed submit leaves buffers reusable and reports failure to handlers.
#[test]
fn test_failed_submit_recovers() {
    let ctx = TestContext::new(Backend::Dummy).unwrap();
    let src = ctx.create_buffer(4, BufferUsage::COPY_SRC);
    let dst = ctx.create_buffer(4, BufferUsage::COPY_DST);
    let mut encoder = TransferEncoder::new();
    encoder.copy_buffer(&src, 0, &dst, 0, 4);

    let failures = Arc::new(AtomicUsize::new(0));
    let queue = ctx.device.default_queue();
    {
        let failures = Arc::clone(&failures);
        queue
            .priority(
                PipelineStage::ALL_COMMANDS,
                Box::new(move |success| {
                    if !success {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
    }
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();

    ctx.dummy().fail_next(DummyFailure::Submit);
    assert!(queue.submit().unwrap_err().is_device_error());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(cmd.state(), CmdBufferState::Fresh);

    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();
    assert_eq!(cmd.executions(), 1);
}

/// External semaphores are waited on by the first batch of the next submit only.
#[test]
fn test_wait_for_semaphore() {
    let ctx = TestContext::new(Backend::Dummy).unwrap();
    let semaphore = ctx.device.create_semaphore().unwrap();
    let queue = ctx.device.default_queue();

    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&ComputeEncoder::new()).unwrap();
    cmd.enqueue().unwrap();
    queue
        .wait_for(&semaphore, PipelineStage::COLOR_ATTACHMENT_OUTPUT)
        .unwrap();
    queue.submit().unwrap();

    cmd.encode(&ComputeEncoder::new()).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();

    let submissions = ctx.dummy().submissions();
    assert_eq!(
        submissions[0][0].wait,
        vec![(semaphore.handle(), PipelineStage::COLOR_ATTACHMENT_OUTPUT)]
    );
    assert!(submissions[1][0].wait.is_empty());
}

// ============================================================================
// Pass Tests
// ============================================================================

/// Clearing a target needs no pipeline and runs on every backend.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_clear_target(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (_pass, target) = ctx.color_target(32, 32);
    let mut encoder = GraphicsEncoder::new();
    encoder
        .set_viewport(0, Viewport::from_dimensions(32, 32))
        .set_scissor(0, ScissorRect::from_dimensions(32, 32))
        .set_target(&target, TargetOp::clear(1, [0.25, 0.5, 0.75, 1.0]))
        .synchronize()
        .set_target(&target, TargetOp::load(1));

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();

    if let Some(dummy) = &ctx.dummy {
        let commands = dummy.commands(cmd.handle());
        let begins = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::BeginRenderPass(_)))
            .count();
        let ends = commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::EndRenderPass))
            .count();
        assert_eq!((begins, ends), (2, 2));
        assert!(commands.contains(&RecordedCommand::MemoryBarrier { by_region: true }));
    }
}

/// Equal operations share one render pass, different ones do not.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_render_pass_cache(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (pass, _target) = ctx.color_target(16, 16);
    let clear = TargetOp::clear(1, [0.0; 4]);
    let first = pass.render_pass(&clear).unwrap();
    let clear_other_color = TargetOp::clear(1, [1.0; 4]);
    assert_eq!(pass.render_pass(&clear_other_color).unwrap(), first);

    let load = pass.render_pass(&TargetOp::load(1)).unwrap();
    assert_ne!(load, first);

    let discard = TargetOp::load(1).with_color(0, AttachmentOp::DONT_CARE, [0.0; 4]);
    assert_ne!(pass.render_pass(&discard).unwrap(), load);

    assert!(pass.render_pass(&TargetOp::load(2)).is_err());
}

/// Targets must match their pass.
#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::vulkan(Backend::Vulkan)]
fn test_target_validation(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let (pass, _target) = ctx.color_target(16, 16);
    let wrong_format = ctx.create_image(16, 16, Format::Rgba16Float, ImageUsage::ATTACHMENT);
    let result = pass.target(
        cmdgfx::Extent2d::new(16, 16),
        1,
        &[cmdgfx::AttachImg::new(wrong_format)],
        &[],
        None,
    );
    assert!(result.is_err());

    let small = ctx.create_image(8, 8, Format::Rgba8Unorm, ImageUsage::ATTACHMENT);
    let result = pass.target(
        cmdgfx::Extent2d::new(16, 16),
        1,
        &[cmdgfx::AttachImg::new(small)],
        &[],
        None,
    );
    assert!(result.is_err());
}

// ============================================================================
// Draw Tests
// ============================================================================

/// A full draw: state, descriptor tables, vertex and index buffers.
#[test]
fn test_indexed_draw_end_to_end() {
    let ctx = TestContext::new(Backend::Dummy).unwrap();
    let (pass, target) = ctx.color_target(64, 64);

    let table = ctx
        .device
        .create_dc_table(&[DcEntry::new(0, DcType::Uniform, 1)])
        .unwrap();
    table.allocate(2).unwrap();
    let uniforms = ctx.create_buffer(256, BufferUsage::UNIFORM);
    table.write_buffer(1, 0, 0, &uniforms, 0, 64).unwrap();

    let state = ctx
        .device
        .create_graphics_state(
            GraphicsStateConfig::new(
                Arc::clone(&pass),
                vec![
                    ctx.stub_shader(ShaderStage::Vertex),
                    ctx.stub_shader(ShaderStage::Fragment),
                ],
            )
            .with_dc_tables(vec![Arc::clone(&table)])
            .with_vertex_input(VertexInput::new(
                12,
                vec![VertexAttribute::new(0, Format::Rgb32Float, 0)],
            )),
        )
        .unwrap();

    let vertices = ctx.create_buffer(36, BufferUsage::VERTEX);
    let indices = ctx.create_buffer(12, BufferUsage::INDEX);
    indices.write(0, &[0, 0, 1, 0, 2, 0]).unwrap();

    let mut encoder = GraphicsEncoder::new();
    encoder
        .set_viewport(0, Viewport::from_dimensions(64, 64))
        .set_scissor(0, ScissorRect::from_dimensions(64, 64))
        .set_target(&target, TargetOp::clear(1, [0.0, 0.0, 0.0, 1.0]))
        .set_state(&state)
        .set_dc_table(0, 1)
        .set_vertex_buffer(0, &vertices, 0)
        .set_index_buffer(&indices, 0, IndexType::U16)
        .draw_indexed(3, 1, 0, 0, 0);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();

    let stats = ctx.dummy().stats();
    assert_eq!(stats.draws_indexed, 1);
    assert_eq!(stats.descriptor_binds, 1);
    assert_eq!(stats.render_pass_begins, 1);
    assert_eq!(cmd.executions(), 1);
}

/// Draws without the required bindings fail and discard the recording.
#[test]
fn test_draw_requires_bindings() {
    let ctx = TestContext::new(Backend::Dummy).unwrap();
    let (pass, target) = ctx.color_target(16, 16);
    let state = ctx
        .device
        .create_graphics_state(GraphicsStateConfig::new(
            pass,
            vec![ctx.stub_shader(ShaderStage::Vertex)],
        ))
        .unwrap();
    let vertices = ctx.create_buffer(36, BufferUsage::VERTEX);

    let mut encoder = GraphicsEncoder::new();
    encoder
        .set_target(&target, TargetOp::load(1))
        .set_state(&state)
        .set_vertex_buffer(0, &vertices, 0)
        .draw(3, 1, 0, 0);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    let err = cmd.encode(&encoder).unwrap_err();
    let GraphicsError::Validation(message) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(message.contains("VIEWPORT"));
    assert!(message.contains("SCISSOR"));
    assert_eq!(cmd.state(), CmdBufferState::Fresh);
    assert!(ctx.dummy().commands(cmd.handle()).is_empty());
}

/// Dispatches bind their state and tables, then run.
#[test]
fn test_compute_dispatch() {
    let ctx = TestContext::new(Backend::Dummy).unwrap();
    let table = ctx
        .device
        .create_dc_table(&[DcEntry::new(0, DcType::Storage, 1)])
        .unwrap();
    table.allocate(1).unwrap();
    let storage = ctx.create_buffer(128, BufferUsage::STORAGE);
    table.write_buffer(0, 0, 0, &storage, 0, 128).unwrap();

    let state = ctx
        .device
        .create_compute_state(
            ComputeStateConfig::new(ctx.stub_shader(ShaderStage::Compute))
                .with_dc_tables(vec![table]),
        )
        .unwrap();

    let mut encoder = ComputeEncoder::new();
    encoder
        .set_state(&state)
        .set_dc_table(0, 0)
        .dispatch(4, 2, 1)
        .synchronize()
        .dispatch(1, 1, 1);

    let queue = ctx.device.default_queue();
    let mut cmd = queue.cmd_buffer().unwrap();
    cmd.encode(&encoder).unwrap();
    cmd.enqueue().unwrap();
    queue.submit().unwrap();

    let commands = ctx.dummy().commands(cmd.handle());
    assert!(commands.contains(&RecordedCommand::Dispatch([4, 2, 1])));
    assert_eq!(ctx.dummy().stats().dispatches, 2);
    assert_eq!(ctx.dummy().stats().barriers, 1);
}
