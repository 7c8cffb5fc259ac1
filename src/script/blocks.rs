//! The block tree of a script and its per-connection state.
//!
//! Blocks are immutable once parsed. Everything that changes while a script
//! plays (positions, selected branches, iteration counts) lives in
//! [`BlockStates`], indexed by the id each block gets at parse time, so one
//! parsed script can serve any number of connections.
//!
//! Blocks never touch the connection themselves. Consuming a message or
//! entering a block yields [`Action`]s that the caller carries out in order.

use std::slice;

use super::lines::{ClientLine, ServerLine};
use crate::bolt::TranslatedStructure;
use crate::error::LineError;

/// Side effect of advancing through the script.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    /// Consume the buffered message, matched by this line
    Consume(&'a ClientLine),
    /// Consume the buffered message and send its auto response
    ConsumeAuto(&'a ClientLine),
    /// Send a server line or run its command
    Respond(&'a ServerLine),
}

/// A node of the script tree.
#[derive(Debug, Clone)]
pub struct Block {
    /// Index into [`BlockStates`]
    pub id: usize,
    /// Line the block starts at
    pub line_number: usize,
    pub kind: BlockKind,
}

/// Block variants. Composite blocks hold [`BlockKind::List`] children.
#[derive(Debug, Clone)]
pub enum BlockKind {
    /// `C:` lines, matched in order
    Client(Vec<ClientLine>),
    /// One `A:` line
    Auto(ClientLine),
    /// `S:` lines, sent when the block is entered
    Server(Vec<ServerLine>),
    /// Blocks in sequence
    List(Vec<Block>),
    /// `{{ ... ---- ... }}`: exactly one branch
    Alternative(Vec<Block>),
    /// `{{ ... ++++ ... }}`: all branches, interleaved
    Parallel(Vec<Block>),
    /// `{? ... ?}`
    Optional(Box<Block>),
    /// `{* ... *}`
    Repeat0(Box<Block>),
    /// `{+ ... +}`
    Repeat1(Box<Block>),
}

/// Mutable state of one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockState {
    /// Next line (leaf blocks) or current child (lists)
    pub index: usize,
    /// Chosen branch of an alternative
    pub selection: Option<usize>,
    /// An optional block consumed something
    pub started: bool,
    /// A repeat block is inside an iteration that can't be left yet
    pub in_block: bool,
    /// Completed jumps back to the top of a repeat block
    pub iterations: usize,
}

/// State of every block of a script, for one connection.
#[derive(Debug, Clone, Default)]
pub struct BlockStates(Vec<BlockState>);

impl BlockStates {
    pub fn get(&self, id: usize) -> BlockState {
        self.0.get(id).copied().unwrap_or_default()
    }

    fn get_mut(&mut self, id: usize) -> &mut BlockState {
        if id >= self.0.len() {
            self.0.resize(id + 1, BlockState::default());
        }
        &mut self.0[id]
    }
}

impl Block {
    pub fn new(id: usize, line_number: usize, kind: BlockKind) -> Self {
        Self {
            id,
            line_number,
            kind,
        }
    }

    /// Direct children.
    pub fn children(&self) -> &[Block] {
        match &self.kind {
            BlockKind::List(blocks)
            | BlockKind::Alternative(blocks)
            | BlockKind::Parallel(blocks) => blocks,
            BlockKind::Optional(inner) | BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
                slice::from_ref(inner)
            }
            BlockKind::Client(_) | BlockKind::Auto(_) | BlockKind::Server(_) => &[],
        }
    }

    fn inner(&self) -> Option<&Block> {
        match &self.kind {
            BlockKind::Optional(inner) | BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
                Some(inner)
            }
            _ => None,
        }
    }

    fn client_line_list(&self) -> &[ClientLine] {
        match &self.kind {
            BlockKind::Client(lines) => lines,
            BlockKind::Auto(line) => slice::from_ref(line),
            _ => &[],
        }
    }

    /// Every client line in the tree, in script order.
    pub fn client_lines<'a>(&'a self, out: &mut Vec<&'a ClientLine>) {
        out.extend(self.client_line_list());
        for child in self.children() {
            child.client_lines(out);
        }
    }

    /// Every server line in the tree, in script order.
    pub fn server_lines<'a>(&'a self, out: &mut Vec<&'a ServerLine>) {
        if let BlockKind::Server(lines) = &self.kind {
            out.extend(lines);
        }
        for child in self.children() {
            child.server_lines(out);
        }
    }

    /// Fail if entering this block would send anything.
    pub fn assert_no_init(&self) -> Result<(), LineError> {
        match &self.kind {
            BlockKind::Server(lines) => match lines.first() {
                Some(first) => Err(LineError::new(
                    &first.line,
                    "ambiguity of script does not allow for server response here",
                )),
                None => Ok(()),
            },
            BlockKind::List(blocks) => blocks.first().map_or(Ok(()), Block::assert_no_init),
            BlockKind::Client(_) | BlockKind::Auto(_) => Ok(()),
            _ => self.children().iter().try_for_each(Block::assert_no_init),
        }
    }

    /// Render the block in script notation, one line per entry, nested
    /// blocks indented by four spaces.
    pub fn canonical(&self, depth: usize, out: &mut Vec<String>) {
        let indent = "    ".repeat(depth);
        let multi = |lists: &[Block], separator: &str, out: &mut Vec<String>| {
            out.push(format!("{}{{{{", indent));
            for (i, list) in lists.iter().enumerate() {
                if i > 0 {
                    out.push(format!("{}{}", indent, separator));
                }
                list.canonical(depth + 1, out);
            }
            out.push(format!("{}}}}}", indent));
        };
        let wrapped = |inner: &Block, open: &str, close: &str, out: &mut Vec<String>| {
            out.push(format!("{}{}", indent, open));
            inner.canonical(depth + 1, out);
            out.push(format!("{}{}", indent, close));
        };
        match &self.kind {
            BlockKind::Client(lines) => {
                out.extend(lines.iter().map(|l| format!("{}{}", indent, l.canonical())));
            }
            BlockKind::Auto(line) => out.push(format!("{}{}", indent, line.canonical())),
            BlockKind::Server(lines) => {
                out.extend(lines.iter().map(|l| format!("{}{}", indent, l.canonical())));
            }
            BlockKind::List(blocks) => {
                for block in blocks {
                    // a list directly inside a list needs its own braces
                    if matches!(block.kind, BlockKind::List(_)) {
                        multi(slice::from_ref(block), "", out);
                    } else {
                        block.canonical(depth, out);
                    }
                }
            }
            BlockKind::Alternative(lists) => multi(lists, "----", out),
            BlockKind::Parallel(lists) => multi(lists, "++++", out),
            BlockKind::Optional(inner) => wrapped(inner, "{?", "?}", out),
            BlockKind::Repeat0(inner) => wrapped(inner, "{*", "*}", out),
            BlockKind::Repeat1(inner) => wrapped(inner, "{+", "+}", out),
        }
    }

    /// Reject scripts where a server response would follow a point whose end
    /// can't be told, checked on the fresh tree.
    pub fn check_ambiguity(&self) -> Result<(), LineError> {
        let fresh = BlockStates::default();
        match &self.kind {
            BlockKind::List(blocks) => {
                for pair in blocks.windows(2) {
                    if !pair[0].has_deterministic_end(&fresh) {
                        pair[1].assert_no_init()?;
                    }
                }
            }
            BlockKind::Alternative(_)
            | BlockKind::Parallel(_)
            | BlockKind::Optional(_)
            | BlockKind::Repeat0(_)
            | BlockKind::Repeat1(_) => {
                self.children().iter().try_for_each(Block::assert_no_init)?;
            }
            BlockKind::Client(_) | BlockKind::Auto(_) | BlockKind::Server(_) => {}
        }
        self.children().iter().try_for_each(Block::check_ambiguity)
    }

    /// Client lines that could match the next message.
    pub fn accepted_messages<'a>(&'a self, st: &BlockStates) -> Vec<&'a ClientLine> {
        let state = st.get(self.id);
        match &self.kind {
            BlockKind::Client(_) | BlockKind::Auto(_) => {
                self.client_line_list().iter().skip(state.index).take(1).collect()
            }
            BlockKind::Server(_) => Vec::new(),
            BlockKind::List(blocks) => {
                let mut accepted = Vec::new();
                for block in blocks.iter().skip(state.index) {
                    accepted.extend(block.accepted_messages(st));
                    if !block.can_be_skipped(st) {
                        break;
                    }
                }
                accepted
            }
            BlockKind::Alternative(lists) => match state.selection {
                Some(i) => lists[i].accepted_messages(st),
                None => lists.iter().flat_map(|l| l.accepted_messages(st)).collect(),
            },
            BlockKind::Parallel(lists) => {
                lists.iter().flat_map(|l| l.accepted_messages(st)).collect()
            }
            BlockKind::Optional(inner) => inner.accepted_messages(st),
            BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
                let mut accepted = inner.accepted_messages(st);
                let may_restart = (inner.has_deterministic_end(st) && inner.done(st))
                    || inner.can_be_skipped(st);
                if may_restart {
                    for line in inner.accepted_messages_after_reset(st) {
                        if !accepted.iter().any(|a| a.line.raw == line.line.raw) {
                            accepted.push(line);
                        }
                    }
                }
                accepted
            }
        }
    }

    /// Client lines that could match the next message once the block starts
    /// over.
    pub fn accepted_messages_after_reset<'a>(&'a self, st: &BlockStates) -> Vec<&'a ClientLine> {
        match &self.kind {
            BlockKind::Client(_) | BlockKind::Auto(_) => {
                self.client_line_list().iter().take(1).collect()
            }
            BlockKind::Server(_) => Vec::new(),
            BlockKind::List(blocks) => {
                let mut accepted = Vec::new();
                for block in blocks {
                    accepted.extend(block.accepted_messages_after_reset(st));
                    if !block.can_be_skipped(st) {
                        break;
                    }
                }
                accepted
            }
            BlockKind::Alternative(lists) | BlockKind::Parallel(lists) => lists
                .iter()
                .flat_map(|l| l.accepted_messages_after_reset(st))
                .collect(),
            BlockKind::Optional(inner) | BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
                inner.accepted_messages_after_reset(st)
            }
        }
    }

    /// Whether the script may carry on as if this block were done.
    pub fn can_be_skipped(&self, st: &BlockStates) -> bool {
        let state = st.get(self.id);
        match &self.kind {
            BlockKind::Client(_) | BlockKind::Auto(_) | BlockKind::Server(_) => false,
            BlockKind::List(blocks) => blocks.iter().skip(state.index).all(|b| b.can_be_skipped(st)),
            BlockKind::Alternative(lists) => match state.selection {
                Some(i) => lists[i].can_be_skipped(st),
                None => lists.iter().any(|l| l.can_be_skipped(st)),
            },
            BlockKind::Parallel(lists) => lists.iter().all(|l| l.can_be_skipped(st)),
            BlockKind::Optional(inner) => {
                if !state.started {
                    true
                } else if inner.has_deterministic_end(st) {
                    inner.done(st)
                } else {
                    inner.can_be_skipped(st)
                }
            }
            BlockKind::Repeat0(_) => !state.in_block,
            BlockKind::Repeat1(inner) => {
                !state.in_block && (inner.can_be_skipped(st) || state.iterations >= 1)
            }
        }
    }

    /// Whether the message can be consumed here.
    pub fn can_consume(&self, st: &BlockStates, msg: &TranslatedStructure) -> bool {
        let state = st.get(self.id);
        match &self.kind {
            BlockKind::Client(lines) => lines.get(state.index).is_some_and(|l| l.matches(msg)),
            BlockKind::Auto(line) => state.index == 0 && line.matches(msg),
            BlockKind::Server(_) => false,
            BlockKind::List(blocks) => {
                for block in blocks.iter().skip(state.index) {
                    if block.can_consume(st, msg) {
                        return true;
                    }
                    if !block.can_be_skipped(st) {
                        break;
                    }
                }
                false
            }
            BlockKind::Alternative(lists) => match state.selection {
                Some(i) => lists[i].can_consume(st, msg),
                None => lists.iter().any(|l| l.can_consume(st, msg)),
            },
            BlockKind::Parallel(lists) => lists.iter().any(|l| l.can_consume(st, msg)),
            BlockKind::Optional(inner) => inner.can_consume(st, msg),
            BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
                if inner.can_consume(st, msg) {
                    return true;
                }
                let may_restart = if inner.has_deterministic_end(st) {
                    inner.done(st)
                } else {
                    inner.can_be_skipped(st)
                };
                may_restart && inner.can_consume_after_reset(st, msg)
            }
        }
    }

    /// Whether the message could be consumed if the block started over.
    pub fn can_consume_after_reset(&self, st: &BlockStates, msg: &TranslatedStructure) -> bool {
        match &self.kind {
            BlockKind::Client(_) | BlockKind::Auto(_) => {
                self.client_line_list().first().is_some_and(|l| l.matches(msg))
            }
            BlockKind::Server(_) => false,
            BlockKind::List(blocks) => {
                for block in blocks {
                    if block.can_consume_after_reset(st, msg) {
                        return true;
                    }
                    if !block.can_be_skipped(st) {
                        break;
                    }
                }
                false
            }
            BlockKind::Alternative(lists) | BlockKind::Parallel(lists) => {
                lists.iter().any(|l| l.can_consume_after_reset(st, msg))
            }
            BlockKind::Optional(inner) | BlockKind::Repeat0(inner) | BlockKind::Repeat1(inner) => {
                inner.can_consume_after_reset(st, msg)
            }
        }
    }

    /// Whether [`done`](Self::done) tells when the block is over.
    pub fn has_deterministic_end(&self, st: &BlockStates) -> bool {
        match &self.kind {
            BlockKind::Client(_) | BlockKind::Auto(_) | BlockKind::Server(_) => true,
            BlockKind::List(blocks) => blocks.last().map_or(true, |b| b.has_deterministic_end(st)),
            BlockKind::Alternative(lists) | BlockKind::Parallel(lists) => {
                lists.iter().all(|l| l.has_deterministic_end(st))
            }
            BlockKind::Optional(inner) => {
                st.get(self.id).started && inner.has_deterministic_end(st)
            }
            BlockKind::Repeat0(_) | BlockKind::Repeat1(_) => false,
        }
    }

    /// Whether the block is over. Always `false` for blocks without a
    /// deterministic end.
    pub fn done(&self, st: &BlockStates) -> bool {
        let state = st.get(self.id);
        match &self.kind {
            BlockKind::Client(_) | BlockKind::Auto(_) => {
                state.index >= self.client_line_list().len()
            }
            BlockKind::Server(lines) => state.index >= lines.len(),
            BlockKind::List(blocks) => {
                self.has_deterministic_end(st) && state.index >= blocks.len()
            }
            BlockKind::Alternative(lists) => {
                state.selection.is_some_and(|i| lists[i].done(st))
            }
            BlockKind::Parallel(lists) => lists.iter().all(|l| l.done(st)),
            BlockKind::Optional(inner) => {
                state.started && inner.has_deterministic_end(st) && inner.done(st)
            }
            BlockKind::Repeat0(_) | BlockKind::Repeat1(_) => false,
        }
    }

    /// Enter the block: queue the server lines at its head.
    pub fn init<'a>(&'a self, st: &mut BlockStates, actions: &mut Vec<Action<'a>>) {
        match &self.kind {
            BlockKind::Server(lines) => {
                let state = st.get_mut(self.id);
                actions.extend(lines.iter().skip(state.index).map(Action::Respond));
                state.index = lines.len();
            }
            BlockKind::List(blocks) => {
                while let Some(block) = blocks.get(st.get(self.id).index) {
                    block.init(st, actions);
                    if !block.has_deterministic_end(st) || !block.done(st) {
                        break;
                    }
                    st.get_mut(self.id).index += 1;
                }
            }
            _ => {}
        }
    }

    /// Return the block and everything in it to the freshly entered state.
    pub fn reset(&self, st: &mut BlockStates) {
        *st.get_mut(self.id) = BlockState::default();
        for child in self.children() {
            child.reset(st);
        }
    }

    /// Consume the message if it can be consumed here.
    pub fn try_consume<'a>(
        &'a self,
        st: &mut BlockStates,
        msg: &TranslatedStructure,
        actions: &mut Vec<Action<'a>>,
    ) -> bool {
        match &self.kind {
            BlockKind::Client(lines) => {
                if !self.can_consume(st, msg) {
                    return false;
                }
                let state = st.get_mut(self.id);
                actions.push(Action::Consume(&lines[state.index]));
                state.index += 1;
                true
            }
            BlockKind::Auto(line) => {
                if !self.can_consume(st, msg) {
                    return false;
                }
                actions.push(Action::ConsumeAuto(line));
                st.get_mut(self.id).index += 1;
                true
            }
            BlockKind::Server(_) => false,
            BlockKind::List(blocks) => self.try_consume_list(blocks, st, msg, actions),
            BlockKind::Alternative(lists) => {
                if let Some(i) = st.get(self.id).selection {
                    return lists[i].try_consume(st, msg, actions);
                }
                for (i, list) in lists.iter().enumerate() {
                    if list.try_consume(st, msg, actions) {
                        st.get_mut(self.id).selection = Some(i);
                        return true;
                    }
                }
                false
            }
            BlockKind::Parallel(lists) => lists.iter().any(|l| l.try_consume(st, msg, actions)),
            BlockKind::Optional(inner) => {
                if inner.try_consume(st, msg, actions) {
                    st.get_mut(self.id).started = true;
                    return true;
                }
                false
            }
            BlockKind::Repeat0(_) | BlockKind::Repeat1(_) => self.try_consume_repeat(st, msg, actions),
        }
    }

    fn try_consume_list<'a>(
        &'a self,
        blocks: &'a [Block],
        st: &mut BlockStates,
        msg: &TranslatedStructure,
        actions: &mut Vec<Action<'a>>,
    ) -> bool {
        let start = st.get(self.id).index;
        for (i, block) in blocks.iter().enumerate().skip(start) {
            if block.try_consume(st, msg, actions) {
                st.get_mut(self.id).index = i;
                let mut current = block;
                while current.has_deterministic_end(st) && current.done(st) {
                    let next = {
                        let state = st.get_mut(self.id);
                        state.index += 1;
                        state.index
                    };
                    match blocks.get(next) {
                        Some(block) => {
                            block.init(st, actions);
                            current = block;
                        }
                        None => break,
                    }
                }
                return true;
            }
            if !block.can_be_skipped(st) {
                break;
            }
        }
        false
    }

    fn try_consume_repeat<'a>(
        &'a self,
        st: &mut BlockStates,
        msg: &TranslatedStructure,
        actions: &mut Vec<Action<'a>>,
    ) -> bool {
        let Some(inner) = self.inner() else {
            return false;
        };
        if inner.has_deterministic_end(st) {
            if inner.done(st) {
                return self.jump_to_top(inner, st, msg, actions);
            }
            if inner.try_consume(st, msg, actions) {
                st.get_mut(self.id).in_block = !inner.done(st);
                return true;
            }
            return false;
        }
        if inner.try_consume(st, msg, actions) {
            st.get_mut(self.id).in_block = !inner.can_be_skipped(st);
            return true;
        }
        if inner.can_be_skipped(st) && inner.can_consume_after_reset(st, msg) {
            return self.jump_to_top(inner, st, msg, actions);
        }
        false
    }

    fn jump_to_top<'a>(
        &'a self,
        inner: &'a Block,
        st: &mut BlockStates,
        msg: &TranslatedStructure,
        actions: &mut Vec<Action<'a>>,
    ) -> bool {
        inner.reset(st);
        st.get_mut(self.id).iterations += 1;
        if inner.has_deterministic_end(st) && inner.done(st) {
            // nothing left to consume in a fresh iteration
            return false;
        }
        self.try_consume_repeat(st, msg, actions)
    }
}
