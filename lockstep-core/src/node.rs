//! Component node tree
//!
//! Components hang their settings and debug objects off the system root
//! when they are loaded and remove them when unloaded. Paths are
//! slash-separated names relative to the node searched from.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    Boolean(bool),
    Natural(u64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Setting(Setting),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: String,
    kind: NodeKind,
    children: Vec<Node>,
}

impl Node {
    pub fn object(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::Object,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Append a child object and return it
    pub fn append(&mut self, name: &str) -> &mut Node {
        self.children.push(Node::object(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Append a setting leaf
    pub fn setting(&mut self, name: &str, value: Setting) -> &mut Node {
        self.children.push(Node {
            name: name.to_string(),
            kind: NodeKind::Setting(value),
            children: Vec::new(),
        });
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Remove the direct child called `name`
    pub fn remove(&mut self, name: &str) -> Option<Node> {
        let index = self.children.iter().position(|child| child.name == name)?;
        Some(self.children.remove(index))
    }

    pub fn find(&self, path: &str) -> Option<&Node> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |node, part| node.children.iter().find(|child| child.name == part))
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Node> {
        let mut node = self;
        for part in path.split('/').filter(|part| !part.is_empty()) {
            node = node.children.iter_mut().find(|child| child.name == part)?;
        }
        Some(node)
    }

    pub fn value(&self) -> Option<&Setting> {
        match &self.kind {
            NodeKind::Setting(value) => Some(value),
            NodeKind::Object => None,
        }
    }

    pub fn set_value(&mut self, value: Setting) -> bool {
        match &mut self.kind {
            NodeKind::Setting(current) => {
                *current = value;
                true
            }
            NodeKind::Object => false,
        }
    }
}
