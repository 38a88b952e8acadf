//! Stage ordering: a post-order walk from the writers of the target.

use crate::error::{GraphError, Result};
use crate::resource::ResourceHandle;
use hashbrown::HashMap;

/// The read and write edges of one stage.
#[derive(Debug, Clone)]
pub struct StageEdges<'a> {
    pub name: &'a str,
    pub reads: Vec<ResourceHandle>,
    pub writes: Vec<ResourceHandle>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Map every resource to the stages writing it, in declaration order.
pub fn writers_of(stages: &[StageEdges<'_>]) -> HashMap<ResourceHandle, Vec<usize>> {
    let mut writers: HashMap<ResourceHandle, Vec<usize>> = HashMap::new();
    for (index, stage) in stages.iter().enumerate() {
        for &resource in &stage.writes {
            writers.entry(resource).or_default().push(index);
        }
    }
    writers
}

/// Order the stages contributing to `target` so every writer precedes its readers.
///
/// Stages that do not contribute to the target are left out. A stage reading a
/// resource it writes itself does not depend on itself.
pub fn stage_order(
    stages: &[StageEdges<'_>],
    target: ResourceHandle,
    target_name: &str,
) -> Result<Vec<usize>> {
    let writers = writers_of(stages);
    let roots = writers.get(&target).cloned().unwrap_or_default();
    if roots.is_empty() {
        return Err(GraphError::NoWriters {
            target: target_name.to_string(),
        });
    }

    let mut marks = vec![Mark::Unvisited; stages.len()];
    let mut order = Vec::with_capacity(stages.len());
    for root in roots {
        visit(root, stages, &writers, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit(
    index: usize,
    stages: &[StageEdges<'_>],
    writers: &HashMap<ResourceHandle, Vec<usize>>,
    marks: &mut [Mark],
    order: &mut Vec<usize>,
) -> Result<()> {
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::OnPath => {
            return Err(GraphError::DependencyCycle {
                stage: stages[index].name.to_string(),
            })
        }
        Mark::Unvisited => {}
    }

    marks[index] = Mark::OnPath;
    for resource in &stages[index].reads {
        for &writer in writers.get(resource).map_or(&[][..], Vec::as_slice) {
            if writer != index {
                visit(writer, stages, writers, marks, order)?;
            }
        }
    }
    marks[index] = Mark::Done;
    order.push(index);
    Ok(())
}

/// Reject reads of textures no stage writes.
///
/// `needs_writer` tells which resources must be produced by a stage; buffers and
/// external textures are filled from the host and are exempt.
pub fn check_reads_are_produced(
    stages: &[StageEdges<'_>],
    order: &[usize],
    needs_writer: impl Fn(ResourceHandle) -> bool,
    resource_name: impl Fn(ResourceHandle) -> String,
) -> Result<()> {
    let writers = writers_of(stages);
    for &index in order {
        let stage = &stages[index];
        for &resource in &stage.reads {
            if needs_writer(resource) && !writers.contains_key(&resource) {
                return Err(GraphError::UnproducedRead {
                    stage: stage.name.to_string(),
                    resource: resource_name(resource),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferHandle, TextureHandle};

    fn tex(index: usize) -> ResourceHandle {
        TextureHandle(index).into()
    }

    fn stage<'a>(name: &'a str, reads: &[ResourceHandle], writes: &[ResourceHandle]) -> StageEdges<'a> {
        StageEdges {
            name,
            reads: reads.to_vec(),
            writes: writes.to_vec(),
        }
    }

    fn position(order: &[usize], stage: usize) -> usize {
        order.iter().position(|&s| s == stage).unwrap()
    }

    #[test]
    fn writers_precede_readers() {
        let back = tex(0);
        let gbuffer = tex(1);
        let shadow = tex(2);
        // Declared out of dependency order on purpose.
        let stages = [
            stage("lighting", &[gbuffer, shadow], &[back]),
            stage("geometry", &[], &[gbuffer]),
            stage("shadows", &[], &[shadow]),
        ];

        let order = stage_order(&stages, back, "back").unwrap();
        assert_eq!(order.len(), 3);
        for (writer, reader) in [(1, 0), (2, 0)] {
            assert!(position(&order, writer) < position(&order, reader));
        }
    }

    #[test]
    fn every_edge_is_respected_in_a_chain() {
        let r: Vec<_> = (0..5).map(tex).collect();
        let stages = [
            stage("d", &[r[3]], &[r[4]]),
            stage("b", &[r[1]], &[r[2]]),
            stage("a", &[], &[r[1]]),
            stage("c", &[r[2], r[1]], &[r[3]]),
        ];
        let order = stage_order(&stages, r[4], "final").unwrap();

        let writers = writers_of(&stages);
        for (reader, edges) in stages.iter().enumerate() {
            for resource in &edges.reads {
                for &writer in writers.get(resource).into_iter().flatten() {
                    assert!(position(&order, writer) < position(&order, reader));
                }
            }
        }
    }

    #[test]
    fn shared_dependencies_are_visited_once() {
        let back = tex(0);
        let shared = tex(1);
        let stages = [
            stage("producer", &[], &[shared]),
            stage("first", &[shared], &[back]),
            stage("second", &[shared], &[back]),
        ];
        let order = stage_order(&stages, back, "back").unwrap();
        assert_eq!(order, [0, 1, 2]);
    }

    #[test]
    fn unrelated_stages_are_skipped() {
        let back = tex(0);
        let stages = [stage("debug overlay", &[], &[tex(7)]), stage("main", &[], &[back])];
        assert_eq!(stage_order(&stages, back, "back").unwrap(), [1]);
    }

    #[test]
    fn cycles_are_rejected() {
        let r1 = tex(1);
        let r2 = tex(2);
        let stages = [stage("x", &[r1], &[r2]), stage("y", &[r2], &[r1])];
        let err = stage_order(&stages, r2, "r2").unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle { .. }));
    }

    #[test]
    fn reading_own_output_is_not_a_cycle() {
        let back = tex(0);
        let depth = tex(1);
        let stages = [stage("main", &[depth], &[back, depth])];
        assert_eq!(stage_order(&stages, back, "back").unwrap(), [0]);
    }

    #[test]
    fn target_without_writers_is_rejected() {
        let stages = [stage("main", &[], &[tex(1)])];
        let err = stage_order(&stages, tex(0), "back").unwrap_err();
        assert!(matches!(err, GraphError::NoWriters { target } if target == "back"));
    }

    #[test]
    fn unproduced_texture_reads_are_rejected() {
        let back = tex(0);
        let missing = tex(1);
        let vertices: ResourceHandle = BufferHandle(0).into();
        let stages = [stage("main", &[vertices, missing], &[back])];
        let order = stage_order(&stages, back, "back").unwrap();

        let err = check_reads_are_produced(
            &stages,
            &order,
            |r| matches!(r, ResourceHandle::Texture(_)),
            |r| format!("{r:?}"),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::UnproducedRead { stage, .. } if stage == "main"));

        // Buffers alone need no writer.
        let stages = [stage("main", &[vertices], &[back])];
        assert!(check_reads_are_produced(
            &stages,
            &[0],
            |r| matches!(r, ResourceHandle::Texture(_)),
            |r| format!("{r:?}"),
        )
        .is_ok());
    }

    #[test]
    fn ordering_is_deterministic() {
        let back = tex(0);
        let a = tex(1);
        let b = tex(2);
        let stages = [
            stage("a", &[], &[a]),
            stage("b", &[a], &[b]),
            stage("c", &[a, b], &[back]),
        ];
        let first = stage_order(&stages, back, "back").unwrap();
        let second = stage_order(&stages, back, "back").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, [0, 1, 2]);
    }
}
