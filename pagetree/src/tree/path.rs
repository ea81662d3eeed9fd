use super::node::{IndexEntry, Node};
use crate::container::Container;
use crate::errors::PageTreeResult;

/// One visited node on a [`Path`].
#[derive(Debug)]
pub struct Frame<E, D> {
    /// Entry referencing the node (the tree's root entry for the bottom frame)
    pub entry: IndexEntry<D>,
    pub node: Node<E, D>,
    /// Position of `entry` among the children of the frame below
    pub child_idx: Option<usize>,
    /// The node must be written back when the frame is released
    pub dirty: bool,
}

/// Explicit stack of (entry, node) pairs from the root down to the current
/// node.
///
/// Every node on the path is fixed in the container. Releasing a frame writes
/// the node back if it is dirty and unfixes it; frames left on the stack when
/// the path is dropped are unfixed without being written.
pub struct Path<'a, C, E, D>
where
    C: Container<Node<E, D>>,
{
    container: &'a C,
    frames: Vec<Frame<E, D>>,
}

impl<'a, C, E, D> Path<'a, C, E, D>
where
    C: Container<Node<E, D>>,
{
    pub fn new(container: &'a C) -> Self {
        Self {
            container,
            frames: Vec::new(),
        }
    }

    pub fn container(&self) -> &'a C {
        self.container
    }

    /// Loads and fixes the node referenced by `entry`.
    pub fn push(&mut self, entry: IndexEntry<D>, child_idx: Option<usize>) -> PageTreeResult<()> {
        let node = self.container.get(entry.id, false)?;
        self.frames.push(Frame {
            entry,
            node,
            child_idx,
            dirty: false,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<&Frame<E, D>> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame<E, D>> {
        self.frames.last_mut()
    }

    pub fn frame(&self, depth: usize) -> Option<&Frame<E, D>> {
        self.frames.get(depth)
    }

    pub fn frame_mut(&mut self, depth: usize) -> Option<&mut Frame<E, D>> {
        self.frames.get_mut(depth)
    }

    /// Removes the top frame without releasing it. The caller takes over the
    /// fix and must pass the frame to [`Path::release`] or remove the node.
    pub fn take(&mut self) -> Option<Frame<E, D>> {
        self.frames.pop()
    }

    /// Writes back (if dirty) and unfixes a frame taken off the path.
    pub fn release(&self, frame: &Frame<E, D>) -> PageTreeResult<()> {
        if frame.dirty {
            self.container.update(frame.entry.id, &frame.node, true)
        } else {
            self.container.unfix(frame.entry.id)
        }
    }

    /// Pops and releases the top frame, returning it.
    pub fn pop(&mut self) -> PageTreeResult<Option<Frame<E, D>>> {
        match self.frames.pop() {
            Some(frame) => {
                self.release(&frame)?;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Releases every frame from the top down.
    pub fn close(mut self) -> PageTreeResult<()> {
        while self.pop()?.is_some() {}
        Ok(())
    }
}

impl<C, E, D> Drop for Path<'_, C, E, D>
where
    C: Container<Node<E, D>>,
{
    fn drop(&mut self) {
        for frame in self.frames.drain(..).rev() {
            let _ = self.container.unfix(frame.entry.id);
        }
    }
}
