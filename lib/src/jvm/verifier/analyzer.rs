use super::*;
use crate::jvm::class_graph::TypeHierarchy;
use crate::jvm::code::{CodeInstruction, MethodCode};
use crate::jvm::{AnalysisError, InternalFault, VerifierErrorKind};
use crate::util::OffsetVec;
use std::collections::VecDeque;

/// What the analyzer knows about a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    /// No path to the block has been interpreted yet
    Unvisited,

    /// The entry frame changed since the block was last interpreted
    Queued(VerifierFrame),

    /// The block was interpreted with this entry frame
    Stable(VerifierFrame),
}

impl BlockState {
    /// Entry frame of the block, if one has been computed
    pub fn frame(&self) -> Option<&VerifierFrame> {
        match self {
            BlockState::Unvisited => None,
            BlockState::Queued(frame) | BlockState::Stable(frame) => Some(frame),
        }
    }
}

/// Frames computed by an analysis run, indexed by instruction
///
/// Instructions that are never reached have no frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    /// Frame before each instruction executes
    pub frames: Vec<Option<VerifierFrame>>,

    /// Frame after each instruction executes (before any jump)
    pub frames_after: Vec<Option<VerifierFrame>>,

    /// Number of times a block was interpreted
    pub block_visits: usize,
}

/// Fixed-point dataflow analysis over a control flow graph
///
/// Blocks are processed in FIFO order starting from the entry. Each block is interpreted from its
/// entry frame, and the frame at its exit (or, for exception edges, the frame around each covered
/// instruction) is merged into its successors. Successors whose entry frame changed are queued
/// again. Once the queue is empty, every block entry frame is the join of the frames flowing into
/// it.
pub struct Analyzer<'a, I: ?Sized, H: ?Sized> {
    interpreter: &'a I,
    hierarchy: &'a H,
    settings: &'a Settings,
}

/// Mutable state of one analysis run
struct Run<'c> {
    cfg: &'c ControlFlowGraph,
    states: Vec<BlockState>,
    worklist: VecDeque<BlockId>,
}

impl<'a, I: Interpreter + ?Sized, H: TypeHierarchy + ?Sized> Analyzer<'a, I, H> {
    pub fn new(interpreter: &'a I, hierarchy: &'a H, settings: &'a Settings) -> Self {
        Analyzer {
            interpreter,
            hierarchy,
            settings,
        }
    }

    /// Compute the frames around every instruction
    pub fn run(
        &self,
        cfg: &ControlFlowGraph,
        code: &MethodCode,
        entry_frame: VerifierFrame,
    ) -> Result<Analysis, AnalysisError> {
        let mut frames: Vec<Option<VerifierFrame>> = vec![None; code.len()];
        let mut frames_after: Vec<Option<VerifierFrame>> = vec![None; code.len()];
        let mut run = Run {
            cfg,
            states: vec![BlockState::Unvisited; cfg.len()],
            worklist: VecDeque::new(),
        };
        run.states[BlockId::ENTRY.0] = BlockState::Queued(entry_frame);
        run.worklist.push_back(BlockId::ENTRY);

        let frame_slots = code.max_stack as usize + code.max_locals as usize;
        let limit = self.settings.iteration_limit(cfg.len(), frame_slots);
        let mut iterations = 0;

        while let Some(block_id) = run.worklist.pop_front() {
            iterations += 1;
            if iterations > limit {
                return Err(AnalysisError::Internal {
                    index: None,
                    fault: InternalFault::IterationLimit { limit },
                });
            }

            let block = cfg.block(block_id);
            let entry = match &run.states[block_id.0] {
                BlockState::Queued(frame) | BlockState::Stable(frame) => frame.clone(),
                BlockState::Unvisited => {
                    return Err(AnalysisError::Internal {
                        index: Some(block.start),
                        fault: InternalFault::UnvisitedBlockQueued(block_id),
                    })
                }
            };
            if block.start >= block.end {
                return Err(AnalysisError::Internal {
                    index: None,
                    fault: InternalFault::EmptyBlock(block_id),
                });
            }
            log::debug!(
                "Interpreting block {:?} (instructions {}..{}, {} queued)",
                block_id,
                block.start,
                block.end,
                run.worklist.len()
            );
            run.states[block_id.0] = BlockState::Stable(entry.clone());

            let mut frame = entry;
            for index in block.instructions() {
                let instruction = &code.instructions[index];
                let before = frame.clone();
                self.interpreter
                    .execute(index, instruction, &mut frame)
                    .map_err(|err| match err {
                        StepError::Type(kind) => AnalysisError::Type { index, kind },
                        StepError::Internal(fault) => AnalysisError::Internal {
                            index: Some(index),
                            fault,
                        },
                    })?;

                // Exceptions can happen before or after the instruction's effect on the locals
                let writes_local = matches!(
                    instruction,
                    CodeInstruction::Regular(insn) if insn.writes_local()
                );
                for handler_entry in cfg.handlers_at(index) {
                    let handler = &code.exception_handlers[*handler_entry];
                    let target = cfg.block_of(handler.handler);
                    let exception_value = self.interpreter.exception_value(handler);
                    if code.max_stack < 1 {
                        return Err(AnalysisError::Type {
                            index,
                            kind: VerifierErrorKind::StackOverflow {
                                max_stack: code.max_stack,
                            },
                        });
                    }

                    let mut sources = vec![&before];
                    if writes_local {
                        sources.push(&frame);
                    }
                    for source in sources {
                        let handler_frame = Frame {
                            locals: source.locals.clone(),
                            stack: OffsetVec::from([exception_value.clone()]),
                        };
                        run.propagate(handler_frame, target, self.hierarchy)?;
                    }
                }

                frames[index] = Some(before);
                frames_after[index] = Some(frame.clone());
            }

            for (successor, kind) in &block.successors {
                if *kind == EdgeKind::Normal {
                    run.propagate(frame.clone(), *successor, self.hierarchy)?;
                }
            }
        }

        log::debug!(
            "Reached a fixed point after {} block visits ({} blocks)",
            iterations,
            cfg.len()
        );
        Ok(Analysis {
            frames,
            frames_after,
            block_visits: iterations,
        })
    }
}

impl<'c> Run<'c> {
    /// Merge a frame into the entry of a block, queueing the block if its entry changed
    fn propagate<H: TypeHierarchy + ?Sized>(
        &mut self,
        frame: VerifierFrame,
        target: BlockId,
        hierarchy: &H,
    ) -> Result<(), AnalysisError> {
        let target_start = self.cfg.block(target).start;
        let merge_error = |kind| AnalysisError::Type {
            index: target_start,
            kind,
        };

        let state = &mut self.states[target.0];
        match state {
            BlockState::Unvisited => {
                *state = BlockState::Queued(frame);
                self.worklist.push_back(target);
            }
            BlockState::Queued(existing) => {
                existing.merge_from(&frame, hierarchy).map_err(merge_error)?;
            }
            BlockState::Stable(existing) => {
                if existing.merge_from(&frame, hierarchy).map_err(merge_error)? {
                    let merged = existing.clone();
                    *state = BlockState::Queued(merged);
                    self.worklist.push_back(target);
                }
            }
        }
        Ok(())
    }
}
