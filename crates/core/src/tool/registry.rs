use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::ready;
use std::sync::Arc;

use serde_json::Value;
use simpleagent_model::ModelTool;

use super::{
    AsyncAdaptor, BlockingAdaptor, BlockingTool, BoxToolFuture, Error,
    FnTool, LocalInvoke, RemoteInvoker, Tool,
};
use crate::ConfigError;

/// Name, description and parameter schema of a tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolSpec {
    /// Name of the tool, unique within a registry.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: Value,
}

/// Where a tool runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// In this process.
    Local,
    /// On the remote tool server with this id.
    Remote {
        /// Id of the hosting server.
        server_id: String,
    },
}

/// A registered tool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolDescriptor {
    /// The tool's specification.
    pub spec: ToolSpec,
    /// How the tool is invoked.
    pub kind: ToolKind,
}

impl ToolDescriptor {
    /// Returns the tool name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    fn source(&self) -> String {
        match &self.kind {
            ToolKind::Local => "a built-in tool".to_owned(),
            ToolKind::Remote { server_id } => format!("server `{server_id}`"),
        }
    }
}

enum Handle {
    Local(Arc<dyn LocalInvoke>),
    Remote(Arc<dyn RemoteInvoker>),
}

struct Entry {
    descriptor: ToolDescriptor,
    handle: Handle,
}

/// The set of tools available to an agent.
///
/// Registration happens once at startup. Afterwards the registry is shared
/// read-only behind an `Arc`, and lookups need no locking. Tools keep their
/// registration order, which is also the order they are presented to the
/// model.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asynchronous tool.
    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), ConfigError> {
        let spec = ToolSpec {
            name: tool.name().to_owned(),
            description: tool.description().to_owned(),
            parameters: tool.parameter_schema().clone(),
        };
        self.insert_local(spec, Arc::new(AsyncAdaptor(tool)))
    }

    /// Registers a synchronous tool, which runs on the blocking pool.
    pub fn register_blocking<T: BlockingTool>(
        &mut self,
        tool: T,
    ) -> Result<(), ConfigError> {
        let spec = ToolSpec {
            name: tool.name().to_owned(),
            description: tool.description().to_owned(),
            parameters: tool.parameter_schema().clone(),
        };
        self.insert_local(spec, Arc::new(BlockingAdaptor(Arc::new(tool))))
    }

    /// Registers a function tool.
    pub fn register_fn(&mut self, tool: FnTool) -> Result<(), ConfigError> {
        let spec = ToolSpec {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        };
        self.insert_local(spec, Arc::new(tool))
    }

    /// Registers the tools discovered on a remote server.
    ///
    /// Nothing is registered if any of the names is already taken.
    pub fn register_remote(
        &mut self,
        server_id: &str,
        specs: Vec<ToolSpec>,
        invoker: Arc<dyn RemoteInvoker>,
    ) -> Result<(), ConfigError> {
        let kind = ToolKind::Remote {
            server_id: server_id.to_owned(),
        };
        let descriptors: Vec<_> = specs
            .into_iter()
            .map(|spec| ToolDescriptor {
                spec,
                kind: kind.clone(),
            })
            .collect();
        for (idx, descriptor) in descriptors.iter().enumerate() {
            let name = descriptor.name();
            if let Some(existing) = self.lookup(name) {
                return Err(duplicate(existing, descriptor));
            }
            if let Some(earlier) =
                descriptors[..idx].iter().find(|d| d.name() == name)
            {
                return Err(duplicate(earlier, descriptor));
            }
        }
        debug!(
            "registering {} tools from server {server_id}",
            descriptors.len()
        );
        for descriptor in descriptors {
            self.push(descriptor, Handle::Remote(Arc::clone(&invoker)));
        }
        Ok(())
    }

    fn insert_local(
        &mut self,
        spec: ToolSpec,
        tool: Arc<dyn LocalInvoke>,
    ) -> Result<(), ConfigError> {
        let descriptor = ToolDescriptor {
            spec,
            kind: ToolKind::Local,
        };
        if let Some(existing) = self.lookup(descriptor.name()) {
            return Err(duplicate(existing, &descriptor));
        }
        self.push(descriptor, Handle::Local(tool));
        Ok(())
    }

    fn push(&mut self, descriptor: ToolDescriptor, handle: Handle) {
        self.index
            .insert(descriptor.name().to_owned(), self.entries.len());
        self.entries.push(Entry { descriptor, handle });
    }

    #[inline]
    fn lookup(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&idx| &self.entries[idx].descriptor)
    }

    /// Looks up a tool by name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, Error> {
        self.lookup(name).ok_or_else(|| {
            Error::not_found().with_reason(format!("no tool named `{name}`"))
        })
    }

    /// Invokes a tool.
    ///
    /// The returned future does not borrow the registry. Faults of any kind
    /// come back as `Err` values; invoking never panics on bad input.
    pub fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: Value,
    ) -> BoxToolFuture {
        let Some(&idx) = self.index.get(descriptor.name()) else {
            let err = Error::not_found()
                .with_reason(format!("no tool named `{}`", descriptor.name()));
            return Box::pin(ready(Err(err)));
        };
        match &self.entries[idx].handle {
            Handle::Local(tool) => tool.invoke(arguments),
            Handle::Remote(invoker) => {
                let invoker = Arc::clone(invoker);
                let ToolKind::Remote { server_id } = descriptor.kind.clone()
                else {
                    let err = Error::execution_error()
                        .with_reason("descriptor kind does not match the tool");
                    return Box::pin(ready(Err(err)));
                };
                let tool_name = descriptor.name().to_owned();
                Box::pin(async move {
                    invoker.call(&server_id, &tool_name, arguments).await
                })
            }
        }
    }

    /// Returns all descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn model_tools(&self) -> Vec<ModelTool> {
        self.descriptors()
            .map(|descriptor| ModelTool {
                name: descriptor.spec.name.clone(),
                description: descriptor.spec.description.clone(),
                parameters: descriptor.spec.parameters.clone(),
            })
            .collect()
    }
}

impl Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.descriptors()).finish()
    }
}

fn duplicate(first: &ToolDescriptor, second: &ToolDescriptor) -> ConfigError {
    ConfigError::DuplicateTool {
        name: second.name().to_owned(),
        first: first.source(),
        second: second.source(),
    }
}
