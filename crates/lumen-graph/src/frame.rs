//! Per-frame planning: which buffers to rebuild, which descriptors to rewire,
//! and the command sequence of each stage.

use crate::plan::UniformReaders;
use crate::resource::{BufferHandle, BufferResource, BufferUsage};
use lumen_gpu::DebugLabelColor;

/// A uniform binding to point at a freshly rebuilt buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRewire {
    pub stage: usize,
    pub binding: u32,
    pub buffer: BufferHandle,
}

/// Buffers whose announced data has not been uploaded yet.
pub fn collect_buffer_updates(buffers: &[BufferResource]) -> Vec<BufferHandle> {
    buffers
        .iter()
        .enumerate()
        .filter(|(_, buffer)| buffer.is_dirty())
        .map(|(index, _)| BufferHandle(index))
        .collect()
}

/// Descriptor writes needed after `rebuilt` buffers got new GPU buffers.
///
/// Only stages that read a rebuilt uniform buffer are touched.
pub fn descriptor_rewires(
    rebuilt: &[BufferHandle],
    usage: impl Fn(BufferHandle) -> BufferUsage,
    readers: &UniformReaders,
) -> Vec<DescriptorRewire> {
    rebuilt
        .iter()
        .filter(|&&buffer| usage(buffer) == BufferUsage::Uniform)
        .flat_map(|&buffer| {
            readers
                .get(&buffer)
                .into_iter()
                .flatten()
                .map(move |reader| DescriptorRewire {
                    stage: reader.stage,
                    binding: reader.binding,
                    buffer,
                })
        })
        .collect()
}

/// Everything needed to lay out the commands of one stage.
#[derive(Debug, Clone)]
pub struct StageRecording {
    pub stage: usize,
    pub label_color: DebugLabelColor,
    pub clears_screen: bool,
    /// Index buffers read, in read order. Only the last one stays bound.
    pub index_buffers: Vec<BufferHandle>,
    /// Vertex buffers by binding, ascending.
    pub vertex_buffers: Vec<(u32, BufferHandle)>,
    pub push_constant_count: usize,
    pub has_descriptor_set: bool,
}

/// One step of a recorded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOp {
    BeginDebugRegion { stage: usize, color: DebugLabelColor },
    BeginRenderPass { stage: usize, clear: bool },
    BindIndexBuffer(BufferHandle),
    BindVertexBuffers { first_binding: u32, buffers: Vec<BufferHandle> },
    BindPipeline(usize),
    PushConstants { stage: usize, index: usize },
    BindDescriptorSet(usize),
    Record(usize),
    EndRenderPass,
    FullBarrier,
    EndDebugRegion,
}

/// Commands for one stage, skipping buffers that have no GPU buffer yet.
pub fn stage_ops(recording: &StageRecording, is_uploaded: impl Fn(BufferHandle) -> bool) -> Vec<RecordOp> {
    let stage = recording.stage;
    let mut ops = vec![
        RecordOp::BeginDebugRegion {
            stage,
            color: recording.label_color,
        },
        RecordOp::BeginRenderPass {
            stage,
            clear: recording.clears_screen,
        },
    ];

    if let Some(&index_buffer) = recording
        .index_buffers
        .iter()
        .rev()
        .find(|&&buffer| is_uploaded(buffer))
    {
        ops.push(RecordOp::BindIndexBuffer(index_buffer));
    }

    // Consecutive bindings go out in one bind call.
    let mut run: Option<(u32, Vec<BufferHandle>)> = None;
    for &(binding, buffer) in &recording.vertex_buffers {
        if !is_uploaded(buffer) {
            continue;
        }
        let extends_run = matches!(
            &run,
            Some((first, buffers)) if *first + buffers.len() as u32 == binding
        );
        if extends_run {
            if let Some((_, buffers)) = &mut run {
                buffers.push(buffer);
            }
            continue;
        }
        if let Some((first_binding, buffers)) = run.take() {
            ops.push(RecordOp::BindVertexBuffers {
                first_binding,
                buffers,
            });
        }
        run = Some((binding, vec![buffer]));
    }
    if let Some((first_binding, buffers)) = run {
        ops.push(RecordOp::BindVertexBuffers {
            first_binding,
            buffers,
        });
    }

    ops.push(RecordOp::BindPipeline(stage));
    ops.extend((0..recording.push_constant_count).map(|index| RecordOp::PushConstants { stage, index }));
    if recording.has_descriptor_set {
        ops.push(RecordOp::BindDescriptorSet(stage));
    }
    ops.extend([
        RecordOp::Record(stage),
        RecordOp::EndRenderPass,
        RecordOp::FullBarrier,
        RecordOp::EndDebugRegion,
    ]);
    ops
}

/// Commands for a whole frame, stages in compiled order.
pub fn frame_ops(
    recordings: &[StageRecording],
    is_uploaded: impl Fn(BufferHandle) -> bool,
) -> Vec<RecordOp> {
    recordings
        .iter()
        .flat_map(|recording| stage_ops(recording, &is_uploaded))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::UniformReader;

    fn triangle() -> StageRecording {
        StageRecording {
            stage: 0,
            label_color: DebugLabelColor::Red,
            clears_screen: true,
            index_buffers: Vec::new(),
            vertex_buffers: vec![(0, BufferHandle(0))],
            push_constant_count: 0,
            has_descriptor_set: false,
        }
    }

    #[test]
    fn triangle_frame() {
        let ops = stage_ops(&triangle(), |_| true);
        assert_eq!(
            ops,
            [
                RecordOp::BeginDebugRegion {
                    stage: 0,
                    color: DebugLabelColor::Red
                },
                RecordOp::BeginRenderPass {
                    stage: 0,
                    clear: true
                },
                RecordOp::BindVertexBuffers {
                    first_binding: 0,
                    buffers: vec![BufferHandle(0)]
                },
                RecordOp::BindPipeline(0),
                RecordOp::Record(0),
                RecordOp::EndRenderPass,
                RecordOp::FullBarrier,
                RecordOp::EndDebugRegion,
            ]
        );
        let passes = ops
            .iter()
            .filter(|op| matches!(op, RecordOp::BeginRenderPass { .. }))
            .count();
        assert_eq!(passes, 1);
        assert_eq!(ops.iter().filter(|op| **op == RecordOp::Record(0)).count(), 1);
    }

    #[test]
    fn barrier_separates_stages() {
        let first = StageRecording {
            stage: 1,
            clears_screen: false,
            vertex_buffers: Vec::new(),
            ..triangle()
        };
        let second = StageRecording {
            stage: 0,
            ..first.clone()
        };
        let ops = frame_ops(&[first, second], |_| true);

        let record_a = ops.iter().position(|op| *op == RecordOp::Record(1)).unwrap();
        let record_b = ops.iter().position(|op| *op == RecordOp::Record(0)).unwrap();
        assert!(record_a < record_b);
        assert!(ops[record_a..record_b].contains(&RecordOp::FullBarrier));
    }

    #[test]
    fn bind_order_within_a_stage() {
        let recording = StageRecording {
            index_buffers: vec![BufferHandle(3)],
            push_constant_count: 2,
            has_descriptor_set: true,
            ..triangle()
        };
        let ops = stage_ops(&recording, |_| true);
        let at = |op: &RecordOp| ops.iter().position(|o| o == op).unwrap();

        assert!(at(&RecordOp::BindIndexBuffer(BufferHandle(3))) < at(&RecordOp::BindPipeline(0)));
        assert!(at(&RecordOp::BindPipeline(0)) < at(&RecordOp::PushConstants { stage: 0, index: 0 }));
        assert!(at(&RecordOp::PushConstants { stage: 0, index: 1 }) < at(&RecordOp::BindDescriptorSet(0)));
        assert!(at(&RecordOp::BindDescriptorSet(0)) < at(&RecordOp::Record(0)));
    }

    #[test]
    fn vertex_buffers_batch_by_consecutive_binding() {
        let recording = StageRecording {
            vertex_buffers: vec![
                (0, BufferHandle(0)),
                (1, BufferHandle(1)),
                (3, BufferHandle(2)),
            ],
            ..triangle()
        };
        let binds: Vec<_> = stage_ops(&recording, |_| true)
            .into_iter()
            .filter(|op| matches!(op, RecordOp::BindVertexBuffers { .. }))
            .collect();
        assert_eq!(
            binds,
            [
                RecordOp::BindVertexBuffers {
                    first_binding: 0,
                    buffers: vec![BufferHandle(0), BufferHandle(1)]
                },
                RecordOp::BindVertexBuffers {
                    first_binding: 3,
                    buffers: vec![BufferHandle(2)]
                },
            ]
        );
    }

    #[test]
    fn buffers_without_data_are_not_bound() {
        let recording = StageRecording {
            index_buffers: vec![BufferHandle(5)],
            ..triangle()
        };
        let ops = stage_ops(&recording, |_| false);
        assert!(!ops
            .iter()
            .any(|op| matches!(op, RecordOp::BindIndexBuffer(_) | RecordOp::BindVertexBuffers { .. })));
        assert!(ops.contains(&RecordOp::Record(0)));
    }

    #[test]
    fn dirty_buffers_are_collected_until_uploaded() {
        let mut buffers = vec![
            BufferResource::new("vertices", BufferUsage::Vertex),
            BufferResource::new("uniforms", BufferUsage::Uniform),
        ];
        assert!(collect_buffer_updates(&buffers).is_empty());

        let pattern: Vec<u8> = (0..64u8).map(|b| b.wrapping_mul(7)).collect();
        buffers[1].announce_update(&pattern);
        assert_eq!(collect_buffer_updates(&buffers), [BufferHandle(1)]);
        // The bytes uploaded next frame are exactly the announced ones.
        assert_eq!(buffers[1].data(), pattern.as_slice());

        buffers[1].clear_dirty();
        assert!(collect_buffer_updates(&buffers).is_empty());
    }

    #[test]
    fn rebuilt_uniform_rewires_only_its_readers() {
        let mut readers = UniformReaders::new();
        readers.insert(
            BufferHandle(1),
            vec![
                UniformReader { stage: 0, binding: 0 },
                UniformReader { stage: 2, binding: 1 },
            ],
        );
        readers.insert(BufferHandle(2), vec![UniformReader { stage: 1, binding: 0 }]);
        let usage = |handle: BufferHandle| {
            if handle.0 == 0 {
                BufferUsage::Vertex
            } else {
                BufferUsage::Uniform
            }
        };

        let rewires = descriptor_rewires(&[BufferHandle(0), BufferHandle(1)], usage, &readers);
        assert_eq!(
            rewires,
            [
                DescriptorRewire {
                    stage: 0,
                    binding: 0,
                    buffer: BufferHandle(1)
                },
                DescriptorRewire {
                    stage: 2,
                    binding: 1,
                    buffer: BufferHandle(1)
                },
            ]
        );
        assert!(descriptor_rewires(&[BufferHandle(0)], usage, &readers).is_empty());
    }
}
