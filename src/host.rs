//! In-process platform: tracks application instances, sync registrations and
//! notifications so the worker can run outside a browser.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::PlatformError;
use crate::platform::{ClientId, Clients, NotificationDescriptor, OutboundMessage, Registration};

#[derive(Debug, Default)]
struct ClientSlot {
  open: bool,
  unreachable: bool,
  controlled: bool,
  inbox: Vec<OutboundMessage>,
}

#[derive(Debug, Default)]
struct HostState {
  next_client: u64,
  clients: BTreeMap<ClientId, ClientSlot>,
  claimed: bool,
  listing_fails: bool,
  skip_waiting_calls: usize,
  reject_sync: bool,
  sync_attempts: usize,
  pending_syncs: Vec<String>,
  notifications: Vec<(String, NotificationDescriptor)>,
  opened_windows: Vec<String>,
}

#[derive(Debug, Default)]
pub struct LocalHost {
  state: Mutex<HostState>,
}

impl LocalHost {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> MutexGuard<'_, HostState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Open a new application instance. It is controlled only if the worker
  /// has already claimed clients.
  pub fn open_client(&self) -> ClientId {
    let mut state = self.state();
    state.next_client += 1;
    let id = ClientId(format!("client-{}", state.next_client));
    let controlled = state.claimed;
    state.clients.insert(
      id.clone(),
      ClientSlot {
        open: true,
        controlled,
        ..ClientSlot::default()
      },
    );
    debug!(client = %id, "client opened");
    id
  }

  pub fn close_client(&self, id: &ClientId) -> bool {
    match self.state().clients.get_mut(id) {
      Some(slot) if slot.open => {
        slot.open = false;
        true
      }
      _ => false,
    }
  }

  /// Keep the client listed but make message delivery to it fail.
  #[cfg(test)]
  pub fn set_unreachable(&self, id: &ClientId, unreachable: bool) {
    if let Some(slot) = self.state().clients.get_mut(id) {
      slot.unreachable = unreachable;
    }
  }

  #[cfg(test)]
  pub fn inbox(&self, id: &ClientId) -> Vec<OutboundMessage> {
    self
      .state()
      .clients
      .get(id)
      .map(|slot| slot.inbox.clone())
      .unwrap_or_default()
  }

  #[cfg(test)]
  pub fn is_controlled(&self, id: &ClientId) -> bool {
    self.state().clients.get(id).is_some_and(|slot| slot.controlled)
  }

  #[cfg(test)]
  pub fn claimed(&self) -> bool {
    self.state().claimed
  }

  #[cfg(test)]
  pub fn skip_waiting_calls(&self) -> usize {
    self.state().skip_waiting_calls
  }

  /// Make subsequent sync registrations fail.
  #[cfg(test)]
  pub fn reject_sync(&self, reject: bool) {
    self.state().reject_sync = reject;
  }

  #[cfg(test)]
  pub fn sync_attempts(&self) -> usize {
    self.state().sync_attempts
  }

  #[cfg(test)]
  pub fn pending_syncs(&self) -> Vec<String> {
    self.state().pending_syncs.clone()
  }

  /// Connectivity is back: hand over every pending sync tag and forget them.
  pub fn take_pending_syncs(&self) -> Vec<String> {
    std::mem::take(&mut self.state().pending_syncs)
  }

  /// Put back tags whose sync did not go through, ahead of newer ones.
  pub fn restore_pending_syncs(&self, tags: Vec<String>) {
    let mut state = self.state();
    let newer = std::mem::take(&mut state.pending_syncs);
    for tag in tags.into_iter().chain(newer) {
      if !state.pending_syncs.contains(&tag) {
        state.pending_syncs.push(tag);
      }
    }
  }

  /// Make `match_all` fail, as when the client list is unavailable.
  #[cfg(test)]
  pub fn fail_client_listing(&self, fail: bool) {
    self.state().listing_fails = fail;
  }

  #[cfg(test)]
  pub fn notifications(&self) -> Vec<(String, NotificationDescriptor)> {
    self.state().notifications.clone()
  }

  #[cfg(test)]
  pub fn opened_windows(&self) -> Vec<String> {
    self.state().opened_windows.clone()
  }
}

#[async_trait]
impl Clients for LocalHost {
  async fn match_all(&self) -> Result<Vec<ClientId>, PlatformError> {
    let state = self.state();
    if state.listing_fails {
      return Err(PlatformError::new("clients.matchAll", "client list unavailable"));
    }
    Ok(
      state
        .clients
        .iter()
        .filter(|(_, slot)| slot.open)
        .map(|(id, _)| id.clone())
        .collect(),
    )
  }

  async fn post_message(
    &self,
    client: &ClientId,
    message: &OutboundMessage,
  ) -> Result<(), PlatformError> {
    let mut state = self.state();
    match state.clients.get_mut(client) {
      Some(slot) if slot.open && !slot.unreachable => {
        slot.inbox.push(*message);
        Ok(())
      }
      _ => Err(PlatformError::new(
        "postMessage",
        format!("{} is not reachable", client),
      )),
    }
  }

  async fn claim(&self) -> Result<(), PlatformError> {
    let mut state = self.state();
    state.claimed = true;
    for slot in state.clients.values_mut().filter(|slot| slot.open) {
      slot.controlled = true;
    }
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<(), PlatformError> {
    self.state().opened_windows.push(url.to_string());
    let id = self.open_client();
    info!(client = %id, url, "window opened");
    Ok(())
  }
}

#[async_trait]
impl Registration for LocalHost {
  async fn skip_waiting(&self) -> Result<(), PlatformError> {
    let mut state = self.state();
    state.skip_waiting_calls += 1;
    debug!(calls = state.skip_waiting_calls, "skip waiting");
    Ok(())
  }

  async fn register_sync(&self, tag: &str) -> Result<(), PlatformError> {
    let mut state = self.state();
    state.sync_attempts += 1;
    debug!(tag, attempt = state.sync_attempts, "sync registration");
    if state.reject_sync {
      return Err(PlatformError::new("sync.register", "background sync unavailable"));
    }
    // Registering a tag that is already pending is a no-op
    if !state.pending_syncs.iter().any(|t| t == tag) {
      state.pending_syncs.push(tag.to_string());
    }
    Ok(())
  }

  async fn show_notification(
    &self,
    title: &str,
    notification: &NotificationDescriptor,
  ) -> Result<(), PlatformError> {
    self
      .state()
      .notifications
      .push((title.to_string(), notification.clone()));
    Ok(())
  }
}
