use std::path::Path;

use wavesched::errors::GraphError;
use wavesched::manifest::{Manifest, RawManifest, RawTask};

/// Builder for [`Manifest`] to simplify test setup.
pub struct ManifestBuilder {
    raw: RawManifest,
}

impl ManifestBuilder {
    pub fn new(wave: &str) -> Self {
        Self {
            raw: RawManifest {
                wave: wave.to_string(),
                generated_at: None,
                tasks: Vec::new(),
            },
        }
    }

    pub fn with_task(mut self, task: TaskBuilder) -> Self {
        self.raw.tasks.push(task.build());
        self
    }

    /// Shorthand for a task with dependencies and a default packet path.
    pub fn task(self, id: &str, depends_on: &[&str]) -> Self {
        let mut builder = TaskBuilder::new(id);
        for dep in depends_on {
            builder = builder.after(dep);
        }
        self.with_task(builder)
    }

    pub fn raw(&self) -> &RawManifest {
        &self.raw
    }

    pub fn try_build(self) -> Result<Manifest, GraphError> {
        Manifest::try_from(self.raw)
    }

    pub fn build(self) -> Manifest {
        self.try_build().expect("failed to build valid manifest from builder")
    }

    /// Write the manifest document as JSON.
    pub fn write_to(&self, path: &Path) {
        let json = serde_json::to_string_pretty(&self.raw).expect("serialize manifest");
        std::fs::write(path, json).expect("write manifest");
    }
}

/// Builder for [`RawTask`].
pub struct TaskBuilder {
    task: RawTask,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: RawTask {
                id: id.to_string(),
                backlog: None,
                packet: format!("packets/{id}.md"),
                depends_on: Vec::new(),
                can_run_in_parallel_with: Vec::new(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn hint(mut self, peer: &str) -> Self {
        self.task.can_run_in_parallel_with.push(peer.to_string());
        self
    }

    pub fn packet(mut self, packet: &str) -> Self {
        self.task.packet = packet.to_string();
        self
    }

    pub fn backlog(mut self, backlog: &str) -> Self {
        self.task.backlog = Some(backlog.to_string());
        self
    }

    pub fn build(self) -> RawTask {
        self.task
    }
}
