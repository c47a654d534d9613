use std::thread::JoinHandle;

use document_protocol::{DocumentCommand, DocumentCommands, DocumentView, ObjectId};
use protocol::{DocumentNotice, UiTask};

use crate::{EngineChannels, EngineError, SharedDocument};

/// Work item for the engine thread.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Document(DocumentCommand),
    /// The object processed a message; the UI should flash it.
    Activity(ObjectId),
    /// Ask the UI to open an object's editor.
    Focus(ObjectId),
    /// Inform the UI that an object's displayed value changed.
    Repaint(ObjectId),
    Shutdown,
}

/// Applies engine commands to the shared document and reports the results.
pub struct EngineWorker<D> {
    document: SharedDocument<D>,
    channels: EngineChannels,
}

impl<D> EngineWorker<D>
where
    D: DocumentView + DocumentCommands,
{
    pub fn new(document: SharedDocument<D>, channels: EngineChannels) -> Self {
        Self { document, channels }
    }

    /// Returns `false` once the worker should stop.
    pub fn handle(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Document(command) => {
                self.apply(command);
                true
            }
            EngineCommand::Activity(id) => {
                self.push_task_if_live(UiTask::ObjectActivity(id));
                true
            }
            EngineCommand::Focus(id) => {
                self.push_task_if_live(UiTask::FocusObject(id));
                true
            }
            EngineCommand::Repaint(id) => {
                self.push_task_if_live(UiTask::RepaintObject(id));
                true
            }
            EngineCommand::Shutdown => false,
        }
    }

    fn apply(&mut self, command: DocumentCommand) {
        let structural = command.is_structural();
        let lock_change = match &command {
            DocumentCommand::SetLocked(locked) => Some(*locked),
            _ => None,
        };
        let (result, revision) = self.document.write(|document| {
            let result = command.apply(document);
            (result, document.revision())
        });
        match result {
            Ok(()) => {
                if let Some(locked) = lock_change {
                    self.channels
                        .notices
                        .push(DocumentNotice::LockChanged { locked });
                }
                if structural {
                    self.channels
                        .notices
                        .push(DocumentNotice::Changed { revision });
                }
            }
            Err(error) => {
                tracing::warn!(%error, "document command rejected");
                // A rejected command may still have changed ports or the
                // transaction stack; let the UI re-read.
                self.channels
                    .notices
                    .push(DocumentNotice::Changed { revision });
            }
        }
    }

    fn push_task_if_live(&mut self, task: UiTask) {
        let target = task.target();
        let live = self
            .document
            .read(|document| document.resolve_object(target).is_some());
        if live {
            self.channels.tasks.push(task);
        } else {
            tracing::trace!(%target, "skipping ui task for missing object");
        }
    }

    pub fn run(mut self) {
        while let Ok(command) = self.channels.commands.recv() {
            if !self.handle(command) {
                break;
            }
        }
        tracing::debug!("engine worker stopped");
    }
}

/// Owns the engine thread.
pub struct ExecutionEngine {
    handle: Option<JoinHandle<()>>,
}

impl ExecutionEngine {
    pub fn spawn<D>(
        document: SharedDocument<D>,
        channels: EngineChannels,
    ) -> Result<Self, EngineError>
    where
        D: DocumentView + DocumentCommands + Send + 'static,
    {
        let worker = EngineWorker::new(document, channels);
        let handle = std::thread::Builder::new()
            .name("patch-engine".to_owned())
            .spawn(move || worker.run())
            .map_err(|error| EngineError::Spawn(error.to_string()))?;
        tracing::info!("engine thread started");
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Waits for the thread to finish. Send [`EngineCommand::Shutdown`] (or
    /// drop every command sender) first.
    pub fn join(mut self) -> Result<(), EngineError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| EngineError::Panicked),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelCapacities, create_engine_channels};
    use document::PatchDocument;
    use document_protocol::NewObject;
    use model::Point;
    use std::time::Duration;

    #[test]
    fn worker_applies_commands_and_notifies() {
        let (mut ui, engine) = create_engine_channels(ChannelCapacities::default());
        let document = SharedDocument::new(PatchDocument::new());
        let mut worker = EngineWorker::new(document.clone(), engine);

        assert!(worker.handle(EngineCommand::Document(DocumentCommand::CreateObject(
            NewObject::text("metro 100", Point::new(5, 5)).with_ports(2, 1),
        ))));
        assert!(worker.handle(EngineCommand::Document(DocumentCommand::SetLocked(true))));

        let batch = ui.notices.drain();
        assert!(batch.needs_synchronise);
        assert_eq!(batch.locked, Some(true));
        assert_eq!(batch.latest_revision, Some(1));

        let id = document.read(|document| document.objects()[0].id);
        worker.handle(EngineCommand::Activity(id));
        worker.handle(EngineCommand::Activity(ObjectId(404)));
        assert_eq!(ui.tasks.drain().as_slice(), &[UiTask::ObjectActivity(id)]);

        assert!(!worker.handle(EngineCommand::Shutdown));
    }

    #[test]
    fn engine_thread_processes_until_shutdown() {
        let (ui, engine) = create_engine_channels(ChannelCapacities::default());
        let document = SharedDocument::new(PatchDocument::new());
        let execution = ExecutionEngine::spawn(document.clone(), engine).unwrap();

        ui.commands
            .submit(DocumentCommand::CreateObject(NewObject::text(
                "print",
                Point::ORIGIN,
            )))
            .unwrap();
        ui.commands.submit(EngineCommand::Shutdown).unwrap();
        execution.join().unwrap();

        assert_eq!(document.read(|document| document.object_count()), 1);
        let batch = ui.notices.drain_with_wait(Duration::from_millis(100));
        assert!(batch.needs_synchronise);
    }
}
