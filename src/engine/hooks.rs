//! Lifecycle hooks. Each hook returns [`Flow`]; `Abort` carries the reply the
//! operation ends with.

use crate::engine::context::RequestContext;
use crate::model::Resource;
use crate::response::Reply;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    BeforeDecode,
    BeforeExecute,
    AfterExecute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::BeforeDecode => "before_decode",
            Stage::BeforeExecute => "before_execute",
            Stage::AfterExecute => "after_execute",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    Continue,
    Abort(Reply),
}

impl Flow {
    pub fn abort(reply: Reply) -> Self {
        Flow::Abort(reply)
    }
}

pub type Hook<T> = Box<dyn FnMut(&mut RequestContext<T>) -> Flow + Send + Sync>;

pub struct HookSet<T: Resource> {
    before_decode: Vec<Hook<T>>,
    before_execute: Vec<Hook<T>>,
    after_execute: Vec<Hook<T>>,
}

impl<T: Resource> Default for HookSet<T> {
    fn default() -> Self {
        HookSet {
            before_decode: Vec::new(),
            before_execute: Vec::new(),
            after_execute: Vec::new(),
        }
    }
}

impl<T: Resource> HookSet<T> {
    fn list(&mut self, stage: Stage) -> &mut Vec<Hook<T>> {
        match stage {
            Stage::BeforeDecode => &mut self.before_decode,
            Stage::BeforeExecute => &mut self.before_execute,
            Stage::AfterExecute => &mut self.after_execute,
        }
    }

    pub fn push(&mut self, stage: Stage, hook: Hook<T>) {
        self.list(stage).push(hook);
    }

    pub fn len(&self, stage: Stage) -> usize {
        match stage {
            Stage::BeforeDecode => self.before_decode.len(),
            Stage::BeforeExecute => self.before_execute.len(),
            Stage::AfterExecute => self.after_execute.len(),
        }
    }

    /// Detach a stage's hooks so they can borrow the context mutably while running.
    pub(crate) fn take(&mut self, stage: Stage) -> Vec<Hook<T>> {
        std::mem::take(self.list(stage))
    }

    /// Reattach after running; hooks registered meanwhile go after the originals.
    pub(crate) fn restore(&mut self, stage: Stage, mut hooks: Vec<Hook<T>>) {
        let list = self.list(stage);
        hooks.append(list);
        *list = hooks;
    }
}
