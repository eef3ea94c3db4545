use crate::jvm::code::{CodeInstruction, InsnIndex, MethodCode};
use crate::jvm::StructuralError;
use std::collections::VecDeque;
use std::ops::Range;

/// Position of a basic block in a [`ControlFlowGraph`]
///
/// Blocks are numbered in the order of their first instruction, so the entry block is always
/// `BlockId(0)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Fall through, jump, or switch
    Normal,

    /// From a block with covered instructions to the handler
    Exception,
}

/// Maximal run of instructions with a single entry, which only transfers control at its end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// First instruction
    pub start: InsnIndex,

    /// First instruction after the block
    pub end: InsnIndex,

    pub successors: Vec<(BlockId, EdgeKind)>,
    pub predecessors: Vec<(BlockId, EdgeKind)>,
}

impl BasicBlock {
    pub fn instructions(&self) -> Range<InsnIndex> {
        self.start..self.end
    }
}

/// Control flow graph of a method
///
/// Blocks live in one vector and refer to each other by [`BlockId`]. Building the graph is also
/// where the structure of the code gets validated: jump targets, exception ranges, local
/// variable indices, and falling off the end of the code are all checked here, so that the
/// analysis only ever sees well formed code.
///
/// Exception ranges do not need to nest or line up with block boundaries. Since an exception can
/// happen in the middle of a block, each instruction carries the list of handlers covering it.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,

    /// Block containing each instruction
    block_of: Vec<BlockId>,

    /// Exception handlers (indices into the exception table) covering each instruction, by
    /// priority
    handlers: Vec<Vec<usize>>,

    /// Is the block reachable from the entry?
    reachable: Vec<bool>,
}

impl ControlFlowGraph {
    /// Validate the code and split it into basic blocks
    pub fn build(code: &MethodCode) -> Result<ControlFlowGraph, StructuralError> {
        let len = code.len();
        Self::validate(code)?;

        // Find the first instruction of every block
        let mut leaders = vec![false; len];
        leaders[0] = true;
        for (index, insn) in code.instructions.iter().enumerate() {
            for target in insn.jump_targets() {
                leaders[target] = true;
            }
            if insn.is_branch() && index + 1 < len {
                leaders[index + 1] = true;
            }
        }
        for handler in &code.exception_handlers {
            leaders[handler.handler] = true;
        }

        let mut blocks: Vec<BasicBlock> = vec![];
        let mut block_of: Vec<BlockId> = Vec::with_capacity(len);
        for (index, is_leader) in leaders.iter().enumerate() {
            if *is_leader {
                blocks.push(BasicBlock {
                    start: index,
                    end: index,
                    successors: vec![],
                    predecessors: vec![],
                });
            }
            let current = blocks.len() - 1;
            blocks[current].end = index + 1;
            block_of.push(BlockId(current));
        }

        let mut handlers: Vec<Vec<usize>> = vec![vec![]; len];
        for (entry, handler) in code.exception_handlers.iter().enumerate() {
            for covered in &mut handlers[handler.start..handler.end] {
                covered.push(entry);
            }
        }

        let mut graph = ControlFlowGraph {
            blocks,
            block_of,
            handlers,
            reachable: vec![],
        };
        graph.add_edges(code);
        graph.reachable = graph.compute_reachable();

        log::debug!(
            "Built control flow graph with {} blocks for {} instructions",
            graph.blocks.len(),
            len
        );
        Ok(graph)
    }

    fn validate(code: &MethodCode) -> Result<(), StructuralError> {
        let len = code.len();
        if len == 0 {
            return Err(StructuralError::EmptyCode);
        }

        for (index, insn) in code.instructions.iter().enumerate() {
            match insn {
                CodeInstruction::Branch(branch) if branch.is_subroutine() => {
                    return Err(StructuralError::Subroutine { index });
                }
                CodeInstruction::Branch(branch) => {
                    if let Some(target) = branch.jump_targets().into_iter().find(|t| *t >= len) {
                        return Err(StructuralError::InvalidJumpTarget { index, target });
                    }
                }
                CodeInstruction::Regular(insn) => {
                    if let Some((local, width)) = insn.local_access() {
                        if local as usize + width > code.max_locals as usize {
                            return Err(StructuralError::LocalOutOfRange {
                                index,
                                local,
                                max_locals: code.max_locals,
                            });
                        }
                    }
                }
            }
        }

        if code.instructions[len - 1].can_fall_through() {
            return Err(StructuralError::FallsOffEnd { index: len - 1 });
        }

        for (entry, handler) in code.exception_handlers.iter().enumerate() {
            if handler.start >= handler.end || handler.end > len {
                return Err(StructuralError::InvalidExceptionRange {
                    entry,
                    start: handler.start,
                    end: handler.end,
                });
            }
            if handler.handler >= len {
                return Err(StructuralError::InvalidHandlerTarget {
                    entry,
                    handler: handler.handler,
                });
            }
        }

        Ok(())
    }

    fn add_edges(&mut self, code: &MethodCode) {
        for block_idx in 0..self.blocks.len() {
            let from = BlockId(block_idx);
            let range = self.blocks[block_idx].instructions();
            let last = &code.instructions[range.end - 1];

            if last.can_fall_through() && range.end < code.len() {
                self.add_edge(from, self.block_of[range.end], EdgeKind::Normal);
            }
            for target in last.jump_targets() {
                self.add_edge(from, self.block_of[target], EdgeKind::Normal);
            }
            for index in range {
                for entry in self.handlers[index].clone() {
                    let handler = code.exception_handlers[entry].handler;
                    self.add_edge(from, self.block_of[handler], EdgeKind::Exception);
                }
            }
        }
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId, kind: EdgeKind) {
        if self.blocks[from.0].successors.contains(&(to, kind)) {
            return;
        }
        self.blocks[from.0].successors.push((to, kind));
        self.blocks[to.0].predecessors.push((from, kind));
    }

    fn compute_reachable(&self) -> Vec<bool> {
        let mut reachable = vec![false; self.blocks.len()];
        let mut to_visit = VecDeque::from([BlockId::ENTRY]);
        reachable[BlockId::ENTRY.0] = true;
        while let Some(block) = to_visit.pop_front() {
            for (successor, _) in &self.blocks[block.0].successors {
                if !reachable[successor.0] {
                    reachable[successor.0] = true;
                    to_visit.push_back(*successor);
                }
            }
        }
        reachable
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    /// Block containing an instruction
    pub fn block_of(&self, index: InsnIndex) -> BlockId {
        self.block_of[index]
    }

    /// Exception table entries covering an instruction
    pub fn handlers_at(&self, index: InsnIndex) -> &[usize] {
        &self.handlers[index]
    }

    pub fn is_reachable(&self, id: BlockId) -> bool {
        self.reachable[id.0]
    }

    /// Instruction ranges of the blocks that can never execute
    pub fn dead_code(&self) -> Vec<Range<InsnIndex>> {
        self.blocks
            .iter()
            .zip(&self.reachable)
            .filter(|(_, reachable)| !**reachable)
            .map(|(block, _)| block.instructions())
            .collect()
    }
}
