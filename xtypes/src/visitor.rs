/*!
Depth-first traversal over type trees and value trees.

Instance traversal is preorder; type traversal takes a preorder flag.
Visitors receive one node per tree position and may stop the walk early by
returning [ControlFlow::Break]; the walk unwinds cleanly through every open
frame.
*/

use std::ops::ControlFlow;

use crate::data::{DynamicData, ReadableDynamicDataRef};
use crate::descriptors::{resolve_arc, DynamicType};
use crate::instance::member_present;

/// Edge label leading into a node: a structure member name or a collection
/// position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeAccess<'a> {
    Member(&'a str),
    Index(usize),
}

impl<'a> NodeAccess<'a> {
    pub fn member_name(&self) -> Option<&'a str> {
        match self {
            NodeAccess::Member(name) => Some(name),
            NodeAccess::Index(_) => None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            NodeAccess::Member(_) => None,
            NodeAccess::Index(index) => Some(*index),
        }
    }
}

/// One visited position of a value tree.
pub struct ReadableNode<'a> {
    data: ReadableDynamicDataRef<'a>,
    parent: Option<ReadableDynamicDataRef<'a>>,
    access: Option<NodeAccess<'a>>,
    depth: usize,
}

impl<'a> ReadableNode<'a> {
    /// Cursor at this node.
    pub fn data(&self) -> ReadableDynamicDataRef<'a> {
        self.data
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Cursor at the parent node, when there is one.
    pub fn parent(&self) -> Option<ReadableDynamicDataRef<'a>> {
        self.parent
    }

    /// Edge into this node; `None` at the root.
    pub fn access(&self) -> Option<&NodeAccess<'a>> {
        self.access.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// One visited position of a type tree, with its ancestor chain.
pub struct TypeNode<'a, 'p> {
    ty: &'a DynamicType,
    parent: Option<&'p TypeNode<'a, 'p>>,
    access: Option<NodeAccess<'a>>,
    depth: usize,
}

impl<'a, 'p> TypeNode<'a, 'p> {
    pub fn ty(&self) -> &'a DynamicType {
        self.ty
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn parent(&self) -> Option<&TypeNode<'a, 'p>> {
        self.parent
    }

    pub fn access(&self) -> Option<&NodeAccess<'a>> {
        self.access.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl<'a> ReadableDynamicDataRef<'a> {
    /// Preorder depth-first walk over the value tree below this cursor,
    /// the cursor itself included.
    pub fn for_each<F>(&self, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&ReadableNode<'a>) -> ControlFlow<()>,
    {
        let root = ReadableNode {
            data: *self,
            parent: None,
            access: None,
            depth: 0,
        };
        visit_value(&root, &mut visitor)
    }
}

impl DynamicData {
    /// Preorder depth-first walk over the whole value tree.
    pub fn for_each<F>(&self, visitor: F) -> ControlFlow<()>
    where
        F: for<'a> FnMut(&ReadableNode<'a>) -> ControlFlow<()>,
    {
        self.as_ref().for_each(visitor)
    }
}

fn visit_value<'a, F>(node: &ReadableNode<'a>, visitor: &mut F) -> ControlFlow<()>
where
    F: FnMut(&ReadableNode<'a>) -> ControlFlow<()>,
{
    visitor(node)?;
    let data = node.data;
    let ty = resolve_arc(data.shared_ty());
    let base = data.instance_ptr();
    match &**ty {
        DynamicType::Structure(st) => {
            for member in st.members() {
                if !unsafe { member_present(member, base) } {
                    continue;
                }
                let child = ReadableNode {
                    data: ReadableDynamicDataRef::from_parts(member.shared_type(), unsafe {
                        base.add(member.offset())
                    }),
                    parent: Some(data),
                    access: Some(NodeAccess::Member(member.name())),
                    depth: node.depth + 1,
                };
                visit_value(&child, visitor)?;
            }
        }
        DynamicType::Sequence(seq) => {
            for i in 0..unsafe { ty.instance_len(base) } {
                let child = ReadableNode {
                    data: ReadableDynamicDataRef::from_parts(seq.shared_content(), unsafe {
                        ty.get_at(base as *mut u8, i)
                    }),
                    parent: Some(data),
                    access: Some(NodeAccess::Index(i)),
                    depth: node.depth + 1,
                };
                visit_value(&child, visitor)?;
            }
        }
        DynamicType::Array(array) => {
            for i in 0..array.dimension() as usize {
                let child = ReadableNode {
                    data: ReadableDynamicDataRef::from_parts(array.shared_content(), unsafe {
                        ty.get_at(base as *mut u8, i)
                    }),
                    parent: Some(data),
                    access: Some(NodeAccess::Index(i)),
                    depth: node.depth + 1,
                };
                visit_value(&child, visitor)?;
            }
        }
        DynamicType::Map(map) => {
            // Pairs contribute a key node and a value node each.
            for i in 0..unsafe { ty.instance_len(base) } {
                let pair = unsafe { ty.get_at(base as *mut u8, i) };
                let key = ReadableNode {
                    data: ReadableDynamicDataRef::from_parts(map.shared_key(), pair),
                    parent: Some(data),
                    access: Some(NodeAccess::Index(2 * i)),
                    depth: node.depth + 1,
                };
                visit_value(&key, visitor)?;
                let value = ReadableNode {
                    data: ReadableDynamicDataRef::from_parts(map.shared_value(), unsafe {
                        map.pair_value(base as *mut u8, i)
                    }),
                    parent: Some(data),
                    access: Some(NodeAccess::Index(2 * i + 1)),
                    depth: node.depth + 1,
                };
                visit_value(&value, visitor)?;
            }
        }
        DynamicType::Primitive(_) | DynamicType::String(_) => {}
        DynamicType::Alias(_) => unreachable!("resolved"),
    }
    ControlFlow::Continue(())
}

impl DynamicType {
    /// Depth-first walk over the type tree, preorder or postorder.
    pub fn for_each_type<F>(&self, mut visitor: F, preorder: bool) -> ControlFlow<()>
    where
        F: for<'n, 'p> FnMut(&TypeNode<'n, 'p>) -> ControlFlow<()>,
    {
        let root = TypeNode {
            ty: self,
            parent: None,
            access: None,
            depth: 0,
        };
        visit_type(&root, &mut visitor, preorder)
    }
}

fn visit_type<'a, 'p, F>(
    node: &TypeNode<'a, 'p>,
    visitor: &mut F,
    preorder: bool,
) -> ControlFlow<()>
where
    F: for<'q> FnMut(&TypeNode<'a, 'q>) -> ControlFlow<()>,
{
    if preorder {
        visitor(node)?;
    }
    match node.ty.resolve() {
        DynamicType::Structure(st) => {
            for member in st.members() {
                let child = TypeNode {
                    ty: member.ty(),
                    parent: Some(node),
                    access: Some(NodeAccess::Member(member.name())),
                    depth: node.depth + 1,
                };
                visit_type(&child, visitor, preorder)?;
            }
        }
        DynamicType::Sequence(seq) => {
            let child = TypeNode {
                ty: seq.content(),
                parent: Some(node),
                access: Some(NodeAccess::Index(0)),
                depth: node.depth + 1,
            };
            visit_type(&child, visitor, preorder)?;
        }
        DynamicType::Array(array) => {
            let child = TypeNode {
                ty: array.content(),
                parent: Some(node),
                access: Some(NodeAccess::Index(0)),
                depth: node.depth + 1,
            };
            visit_type(&child, visitor, preorder)?;
        }
        DynamicType::Map(map) => {
            let key = TypeNode {
                ty: map.key(),
                parent: Some(node),
                access: Some(NodeAccess::Index(0)),
                depth: node.depth + 1,
            };
            visit_type(&key, visitor, preorder)?;
            let value = TypeNode {
                ty: map.value(),
                parent: Some(node),
                access: Some(NodeAccess::Index(1)),
                depth: node.depth + 1,
            };
            visit_type(&value, visitor, preorder)?;
        }
        DynamicType::Primitive(_) | DynamicType::String(_) => {}
        DynamicType::Alias(_) => unreachable!("resolved"),
    }
    if !preorder {
        visitor(node)?;
    }
    ControlFlow::Continue(())
}
