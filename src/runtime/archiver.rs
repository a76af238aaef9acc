//! Moves finished instances from live to historical storage.
//!
//! Process archival copies every dependent record first, then inserts the process snapshot, and
//! only then deletes the live rows. A crash between the snapshot insert and the live delete
//! leaves both visible; the next attempt notices the snapshot and only finishes the deletion.
//! Dependents copied by an attempt that failed before the snapshot are not copied twice.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, ErrorContext, Result};
use crate::model::Timestamp;
use crate::model::archive::{
    Archivable, Archived, ArchivedComment, ArchivedDocumentMapping, ArchivedFlowNodeInstance,
    ArchivedProcessInstance, ArchivedTransition,
};
use crate::model::flow_node::FlowNodeInstance;
use crate::model::process::{
    Comment, ConnectorInstance, ContainerType, DataContainer, DataInstance, DocumentMapping,
    ProcessInstance, TransitionRecord,
};
use crate::model::event::{MessageInstance, WaitingEvent};
use crate::model::token::Token;
use crate::runtime::definitions::DefinitionLookup;
use crate::runtime::notifier::{ChangeKind, ChangeNotifier};
use crate::runtime::state_machine::flow_node_context;
use crate::store::{
    ArchiveStores, Entity, Filter, QueryOptions, Repository, Stores, delete_matching, list_all,
};

fn contained_in(container_id: u64, container_type: ContainerType) -> Filter {
    Filter::new()
        .eq("container_id", container_id)
        .eq("container_type", container_type.as_str())
}

/// Copies every row of `source` matching `filter` into `target`, paging by offset. The source
/// set does not shrink while archiving, so plain offset paging is safe.
///
/// Rows that already have a snapshot in `target` are skipped, so an attempt that failed half way
/// can simply be run again.
async fn archive_all<E: Archivable>(
    source: &dyn Repository<E>,
    target: &dyn Repository<Archived<E>>,
    filter: &Filter,
    archive_date: Timestamp,
    page_size: usize,
    context: &ErrorContext,
) -> Result<usize> {
    let page_size = page_size.max(1);
    let mut offset = 0;
    let mut archived = 0;
    loop {
        let options = QueryOptions::new(offset, page_size).filter(filter.clone());
        let page = source
            .list(&options)
            .await
            .map_err(EngineError::search(E::KIND))?;
        let ids: Vec<u64> = page.iter().map(|row| row.id()).collect();
        let done: HashSet<u64> = target
            .list(&QueryOptions::all().filter(Filter::new().is_in("source_object_id", ids)))
            .await
            .map_err(EngineError::search(E::ARCHIVED_KIND))?
            .iter()
            .map(|snapshot| snapshot.source_object_id)
            .collect();
        for row in page.iter().filter(|row| !done.contains(&row.id())) {
            target
                .insert(Archived::of(row, archive_date))
                .await
                .map_err(EngineError::creation(E::ARCHIVED_KIND, context.clone()))?;
            archived += 1;
        }
        if page.len() < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(archived)
}

#[derive(Clone)]
pub struct ProcessArchiver {
    stores: Stores,
    definitions: Arc<dyn DefinitionLookup>,
    notifier: ChangeNotifier,
    page_size: usize,
}

impl ProcessArchiver {
    pub fn new(
        stores: Stores,
        definitions: Arc<dyn DefinitionLookup>,
        notifier: ChangeNotifier,
        page_size: usize,
    ) -> Self {
        Self {
            stores,
            definitions,
            notifier,
            page_size,
        }
    }

    fn archive_for_write(&self, kind: &'static str, context: &ErrorContext) -> Result<&ArchiveStores> {
        self.stores
            .archive(kind)
            .map_err(EngineError::creation(kind, context.clone()))
    }

    fn archive_for_read(&self, kind: &'static str) -> Result<&ArchiveStores> {
        self.stores
            .archive
            .as_ref()
            .ok_or(EngineError::ArchiveTargetNotFound {
                kind,
                context: Box::default(),
            })
    }

    /// Snapshots the process instance and its dependents, then deletes the live rows.
    pub async fn archive_process_instance(
        &self,
        process_instance_id: u64,
        archive_date: Timestamp,
    ) -> Result<ArchivedProcessInstance> {
        let instance = self
            .stores
            .process_instances
            .get(process_instance_id)
            .await
            .map_err(EngineError::read(ProcessInstance::KIND))?
            .ok_or(EngineError::not_found(ProcessInstance::KIND, process_instance_id))?;
        let definition = self
            .definitions
            .process_definition(instance.process_definition_id)
            .await
            .map_err(EngineError::read("process_definition"))?;

        let mut context = ErrorContext::default()
            .process_instance(instance.id)
            .root_process_instance(instance.root_process_instance_id);
        context.process_definition_id = Some(instance.process_definition_id);
        // Without the definition there is no telling which dependents must be kept.
        let Some(definition) = definition else {
            error!(
                process_instance_id,
                process_definition_id = instance.process_definition_id,
                "Process definition not found, refusing to archive"
            );
            return Err(EngineError::not_found(
                "process_definition",
                instance.process_definition_id,
            ));
        };
        context = context.definition(definition.id, &definition.name, &definition.version);
        let archive = self.archive_for_write(ArchivedProcessInstance::KIND, &context)?;

        let existing = archive
            .process_instances
            .list(
                &QueryOptions::new(0, 1)
                    .filter(Filter::new().eq("source_object_id", process_instance_id)),
            )
            .await
            .map_err(EngineError::search(ArchivedProcessInstance::KIND))?;
        if let Some(existing) = existing.into_iter().next() {
            warn!(
                process_instance_id,
                "Process instance already archived, finishing live deletion"
            );
            self.delete_live_process_instance(process_instance_id).await?;
            return Ok(existing);
        }

        let (has_data, has_connectors) = (definition.has_data, definition.has_connectors);
        let stores = &self.stores;
        let page_size = self.page_size;

        delete_matching(
            stores.data_containers.as_ref(),
            &contained_in(process_instance_id, ContainerType::ProcessInstance),
            page_size,
        )
        .await
        .map_err(EngineError::deletion(DataContainer::KIND, context.clone()))?;

        if has_data {
            archive_all(
                stores.data_instances.as_ref(),
                archive.data_instances.as_ref(),
                &contained_in(process_instance_id, ContainerType::ProcessInstance),
                archive_date,
                page_size,
                &context,
            )
            .await?;
        }

        let of_instance = Filter::new().eq("process_instance_id", process_instance_id);
        let comments = archive_all(
            stores.comments.as_ref(),
            archive.comments.as_ref(),
            &of_instance,
            archive_date,
            page_size,
            &context,
        )
        .await?;
        let documents = archive_all(
            stores.document_mappings.as_ref(),
            archive.document_mappings.as_ref(),
            &of_instance,
            archive_date,
            page_size,
            &context,
        )
        .await?;

        if has_connectors {
            archive_all(
                stores.connector_instances.as_ref(),
                archive.connector_instances.as_ref(),
                &contained_in(process_instance_id, ContainerType::ProcessInstance),
                archive_date,
                page_size,
                &context,
            )
            .await?;
        }

        archive_all(
            stores.transitions.as_ref(),
            archive.transitions.as_ref(),
            &of_instance,
            archive_date,
            page_size,
            &context,
        )
        .await?;

        let snapshot = match archive
            .process_instances
            .insert(Archived::of(&instance, archive_date))
            .await
            .map_err(EngineError::creation(ArchivedProcessInstance::KIND, context.clone()))
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    process_instance_id,
                    process_definition_id = ?context.process_definition_id,
                    process_name = ?context.process_definition_name,
                    process_version = ?context.process_definition_version,
                    error = ?e,
                    "Failed to insert process instance snapshot"
                );
                return Err(e);
            }
        };
        self.notifier.notify(ChangeKind::Created, &snapshot);

        self.delete_live_process_instance(process_instance_id)
            .await
            .map_err(|e| e.with_context(&context))?;
        info!(
            process_instance_id,
            comments, documents, "Process instance archived"
        );
        Ok(snapshot)
    }

    /// Deletes the live process instance row and every live record hanging off it. Safe to run
    /// again after a partial failure. Returns false if the row was already gone.
    pub async fn delete_live_process_instance(&self, process_instance_id: u64) -> Result<bool> {
        let stores = &self.stores;
        let page_size = self.page_size;
        let context = ErrorContext::default().process_instance(process_instance_id);
        let of_instance = Filter::new().eq("process_instance_id", process_instance_id);
        let as_container = contained_in(process_instance_id, ContainerType::ProcessInstance);

        delete_matching(stores.comments.as_ref(), &of_instance, page_size)
            .await
            .map_err(EngineError::deletion(Comment::KIND, context.clone()))?;
        delete_matching(stores.document_mappings.as_ref(), &of_instance, page_size)
            .await
            .map_err(EngineError::deletion(DocumentMapping::KIND, context.clone()))?;
        delete_matching(stores.data_instances.as_ref(), &as_container, page_size)
            .await
            .map_err(EngineError::deletion(DataInstance::KIND, context.clone()))?;
        delete_matching(stores.data_containers.as_ref(), &as_container, page_size)
            .await
            .map_err(EngineError::deletion(DataContainer::KIND, context.clone()))?;
        delete_matching(stores.connector_instances.as_ref(), &as_container, page_size)
            .await
            .map_err(EngineError::deletion(ConnectorInstance::KIND, context.clone()))?;
        delete_matching(stores.tokens.as_ref(), &of_instance, page_size)
            .await
            .map_err(EngineError::deletion(Token::KIND, context.clone()))?;
        delete_matching(stores.transitions.as_ref(), &of_instance, page_size)
            .await
            .map_err(EngineError::deletion(TransitionRecord::KIND, context.clone()))?;
        delete_matching(stores.waiting_events.as_ref(), &of_instance, page_size)
            .await
            .map_err(EngineError::deletion(WaitingEvent::KIND, context.clone()))?;
        delete_matching(
            stores.message_instances.as_ref(),
            &Filter::new().eq("thrown_by_process_instance_id", process_instance_id),
            page_size,
        )
        .await
        .map_err(EngineError::deletion(MessageInstance::KIND, context.clone()))?;
        let of_root = Filter::new().eq("root_container_id", process_instance_id);
        let flow_nodes = list_all(
            stores.flow_node_instances.as_ref(),
            &of_root,
            &[],
            page_size,
        )
        .await
        .map_err(EngineError::search(FlowNodeInstance::KIND))?;
        for flow_node in &flow_nodes {
            self.delete_flow_node_dependents(flow_node.id, &context)
                .await?;
        }
        delete_matching(stores.flow_node_instances.as_ref(), &of_root, page_size)
            .await
            .map_err(EngineError::deletion(FlowNodeInstance::KIND, context.clone()))?;

        let removed = stores
            .process_instances
            .delete(process_instance_id)
            .await
            .map_err(EngineError::deletion(ProcessInstance::KIND, context))?;
        if removed {
            debug!(process_instance_id, "Live process instance deleted");
        }
        Ok(removed)
    }

    /// Archives one flow node.
    ///
    /// With `delete_after` its local data and connectors are cleaned up first, then the snapshot
    /// is inserted, then the live row is deleted. Event kinds never produce a snapshot, so for
    /// them this returns `None`.
    pub async fn archive_flow_node_instance(
        &self,
        instance: &FlowNodeInstance,
        delete_after: bool,
        archive_date: Timestamp,
    ) -> Result<Option<ArchivedFlowNodeInstance>> {
        let context = flow_node_context(instance);
        if delete_after {
            self.clean_flow_node_dependents(instance, archive_date, &context)
                .await?;
        }

        let snapshot = match ArchivedFlowNodeInstance::from_live(instance, archive_date) {
            Some(snapshot) => {
                let archive = self.archive_for_write(ArchivedFlowNodeInstance::KIND, &context)?;
                let snapshot = archive
                    .flow_node_instances
                    .insert(snapshot)
                    .await
                    .map_err(EngineError::creation(
                        ArchivedFlowNodeInstance::KIND,
                        context.clone(),
                    ))?;
                self.notifier.notify(ChangeKind::Created, &snapshot);
                Some(snapshot)
            }
            None => None,
        };

        if delete_after {
            let removed = self
                .stores
                .flow_node_instances
                .delete(instance.id)
                .await
                .map_err(EngineError::deletion(FlowNodeInstance::KIND, context))?;
            if removed {
                self.notifier.notify(ChangeKind::Deleted, instance);
            }
        }
        debug!(
            flow_node_instance_id = instance.id,
            flow_node_type = %instance.flow_node_type,
            archived = snapshot.is_some(),
            deleted = delete_after,
            "Flow node archived"
        );
        Ok(snapshot)
    }

    async fn clean_flow_node_dependents(
        &self,
        instance: &FlowNodeInstance,
        archive_date: Timestamp,
        context: &ErrorContext,
    ) -> Result<()> {
        let node_definition = self
            .definitions
            .flow_node_definition(instance.process_definition_id, instance.flow_node_definition_id)
            .await
            .map_err(EngineError::read("flow_node_definition"))?;
        let (has_data, has_connectors) = node_definition
            .map(|d| (d.has_data, d.has_connectors))
            .unwrap_or((false, false));
        let local = contained_in(instance.id, ContainerType::ActivityInstance);
        let stores = &self.stores;

        if has_data {
            let archive = self.archive_for_write(DataInstance::ARCHIVED_KIND, context)?;
            archive_all(
                stores.data_instances.as_ref(),
                archive.data_instances.as_ref(),
                &local,
                archive_date,
                self.page_size,
                context,
            )
            .await?;
        }
        if has_connectors {
            let archive = self.archive_for_write(ConnectorInstance::ARCHIVED_KIND, context)?;
            archive_all(
                stores.connector_instances.as_ref(),
                archive.connector_instances.as_ref(),
                &local,
                archive_date,
                self.page_size,
                context,
            )
            .await?;
        }
        self.delete_flow_node_dependents(instance.id, context).await
    }

    /// Deletes the live data instances, data containers and connectors local to a flow node.
    async fn delete_flow_node_dependents(
        &self,
        flow_node_instance_id: u64,
        context: &ErrorContext,
    ) -> Result<()> {
        let local = contained_in(flow_node_instance_id, ContainerType::ActivityInstance);
        let stores = &self.stores;
        delete_matching(stores.data_instances.as_ref(), &local, self.page_size)
            .await
            .map_err(EngineError::deletion(DataInstance::KIND, context.clone()))?;
        delete_matching(stores.data_containers.as_ref(), &local, self.page_size)
            .await
            .map_err(EngineError::deletion(DataContainer::KIND, context.clone()))?;
        delete_matching(stores.connector_instances.as_ref(), &local, self.page_size)
            .await
            .map_err(EngineError::deletion(ConnectorInstance::KIND, context.clone()))?;
        Ok(())
    }

    /// The snapshot taken from live process instance `process_instance_id`.
    pub async fn get_archived_process_instance(&self, process_instance_id: u64) -> Result<ArchivedProcessInstance> {
        self.search_archived_process_instances(
            &QueryOptions::new(0, 1)
                .filter(Filter::new().eq("source_object_id", process_instance_id)),
        )
        .await?
        .into_iter()
        .next()
        .ok_or(EngineError::not_found(
            ArchivedProcessInstance::KIND,
            process_instance_id,
        ))
    }

    pub async fn search_archived_process_instances(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<ArchivedProcessInstance>> {
        self.archive_for_read(ArchivedProcessInstance::KIND)?
            .process_instances
            .list(options)
            .await
            .map_err(EngineError::search(ArchivedProcessInstance::KIND))
    }

    pub async fn search_archived_comments(&self, options: &QueryOptions) -> Result<Vec<ArchivedComment>> {
        self.archive_for_read(ArchivedComment::KIND)?
            .comments
            .list(options)
            .await
            .map_err(EngineError::search(ArchivedComment::KIND))
    }

    pub async fn search_archived_document_mappings(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<ArchivedDocumentMapping>> {
        self.archive_for_read(ArchivedDocumentMapping::KIND)?
            .document_mappings
            .list(options)
            .await
            .map_err(EngineError::search(ArchivedDocumentMapping::KIND))
    }

    pub async fn search_archived_transitions(&self, options: &QueryOptions) -> Result<Vec<ArchivedTransition>> {
        self.archive_for_read(ArchivedTransition::KIND)?
            .transitions
            .list(options)
            .await
            .map_err(EngineError::search(ArchivedTransition::KIND))
    }

    /// Same filter contract as the live comment store.
    pub async fn count_archived_comments(&self, filter: &Filter) -> Result<usize> {
        self.archive_for_read(ArchivedComment::KIND)?
            .comments
            .count(filter)
            .await
            .map_err(EngineError::search(ArchivedComment::KIND))
    }
}
