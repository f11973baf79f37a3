//!
//! Pagination state
//!
//! The state machine that decides when to ask for the next page and how
//! responses change the loaded list. It performs no I/O: operations return
//! the request to send, if any, and the driver in [crate::client] ships it.
//!
//! The loaded list only grows. Pages are appended in arrival order, and an
//! update replaces a record in place. Nothing survives a disconnect.
//!
//! The server answers each connection in arrival order, so the kinds of the
//! requests in flight are queued and each response is matched to the oldest
//! one. An `error` only ends a page load when it answers a page request.

use std::collections::VecDeque;

use userdir_common::protocol::{
    ClientMessage, GetUsersRequest, RequestKind, ServerMessage,
    UpdateUserRequest,
};
use userdir_common::record::{UserID, UserRecord};

/// A sample of the scroll container geometry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollSample {
    /// Distance scrolled from the top of the content
    pub scroll_top: f64,
    /// Height of the visible window
    pub viewport_height: f64,
    /// Total height of the content
    pub content_height: f64,
}

impl ScrollSample {
    /// True once the bottom of the window is within a third of a viewport
    /// of the end of the content.
    pub fn near_bottom(&self) -> bool {
        let position = self.scroll_top + self.viewport_height;
        let critical = self.content_height - self.viewport_height / 3.0;
        position >= critical
    }
}

/// Editable copy of a record, as filled in by an edit form.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEdit {
    pub full_name: String,
    pub post: String,
    pub address: String,
    pub age: u32,
    pub salary: f64,
    pub has_tax_id: bool,
    pub tax_id: Option<i64>,
}

impl From<&UserRecord> for UserEdit {
    fn from(value: &UserRecord) -> Self {
        Self {
            full_name: value.full_name.clone(),
            post: value.post.clone(),
            address: value.address.clone(),
            age: value.age,
            salary: value.salary,
            has_tax_id: value.has_tax_id == Some(true),
            tax_id: value.tax_id,
        }
    }
}

impl UserEdit {
    fn into_request(self, id: UserID) -> UpdateUserRequest {
        UpdateUserRequest {
            id,
            full_name: self.full_name,
            post: self.post,
            address: self.address,
            age: self.age,
            salary: self.salary,
            has_tax_id: self.has_tax_id,
            tax_id: if self.has_tax_id { self.tax_id } else { None },
        }
    }
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientView {
    pub connected: bool,
    pub list: Vec<UserRecord>,
    pub is_loading: bool,
    pub loaded_all: bool,
    pub editing: Option<UserRecord>,
    pub last_error: Option<String>,
    /// Bumped on every state change
    pub revision: u64,
}

/// What a server response did to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    PageAppended { page: u64, count: usize },
    ReachedEnd,
    RecordUpdated { id: UserID, found: bool },
    Failed(String),
}

#[derive(Debug, Default)]
pub struct PaginationState {
    connected: bool,
    loaded_all: bool,
    is_loading: bool,
    next_page: u64,
    list: Vec<UserRecord>,
    editing: Option<UserRecord>,
    last_error: Option<String>,
    /// Kinds of the requests sent but not yet answered, oldest first
    pending: VecDeque<RequestKind>,
    revision: u64,
}

const INVALID_SALARY: &str = "Salary must be a finite number";

impl PaginationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn loaded_all(&self) -> bool {
        self.loaded_all
    }

    pub fn next_page(&self) -> u64 {
        self.next_page
    }

    pub fn list(&self) -> &[UserRecord] {
        &self.list
    }

    pub fn editing(&self) -> Option<&UserRecord> {
        self.editing.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn view(&self) -> ClientView {
        ClientView {
            connected: self.connected,
            list: self.list.clone(),
            is_loading: self.is_loading,
            loaded_all: self.loaded_all,
            editing: self.editing.clone(),
            last_error: self.last_error.clone(),
            revision: self.revision,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// The connection is open; requests may be issued.
    pub fn on_open(&mut self) {
        self.reset();
        self.connected = true;
        self.touch();
    }

    /// The connection is gone. Everything loaded so far is discarded, and a
    /// new connection starts again from page 0.
    pub fn on_close(&mut self) {
        self.reset();
        self.touch();
    }

    fn reset(&mut self) {
        let revision = self.revision;
        *self = Self {
            revision,
            ..Default::default()
        };
    }

    /// Ask for the next page unless a request is outstanding, the end has
    /// been seen, or there is no connection.
    pub fn request_next_page_if_needed(&mut self) -> Option<ClientMessage> {
        if self.is_loading || self.loaded_all || !self.connected {
            return None;
        }

        self.is_loading = true;
        self.pending.push_back(RequestKind::GetUsers);
        self.touch();

        log::debug!("Requesting page {}", self.next_page);

        Some(ClientMessage::GetUsers(GetUsersRequest {
            start: self.next_page,
        }))
    }

    /// Prefetch once the user scrolls close to the bottom.
    pub fn on_scroll(&mut self, sample: ScrollSample) -> Option<ClientMessage> {
        if !sample.near_bottom() || self.loaded_all || self.is_loading {
            return None;
        }
        self.request_next_page_if_needed()
    }

    /// Start editing a copy of the record with the given id.
    ///
    /// Returns false if no loaded record has that id.
    pub fn on_row_activate(&mut self, id: UserID) -> bool {
        let Some(record) = self.list.iter().find(|u| u.id == id) else {
            return false;
        };

        self.editing = Some(record.clone());
        self.touch();
        true
    }

    /// Send the edited fields for the record being edited.
    ///
    /// The selection stays set until the server confirms the update. An
    /// edit that cannot be sent faithfully is refused with `last_error` set.
    pub fn on_save_edit(&mut self, edit: UserEdit) -> Option<ClientMessage> {
        if !self.connected {
            return None;
        }

        let id = self.editing.as_ref()?.id;

        // serde_json writes NaN and infinities as null
        if !edit.salary.is_finite() {
            self.last_error = Some(INVALID_SALARY.into());
            self.touch();
            return None;
        }

        self.pending.push_back(RequestKind::UpdateUser);

        log::debug!("Saving edit of user {id}");

        Some(ClientMessage::UpdateUser(edit.into_request(id)))
    }

    /// Drop the selection without sending anything.
    pub fn on_cancel_edit(&mut self) {
        if self.editing.take().is_some() {
            self.touch();
        }
    }

    /// Apply a response from the server.
    pub fn handle_message(&mut self, message: ServerMessage) -> Transition {
        let answered = self.pending.pop_front();

        let transition = match message {
            ServerMessage::Users(users) => {
                self.is_loading = false;
                if users.is_empty() {
                    self.loaded_all = true;
                    Transition::ReachedEnd
                } else {
                    let page = self.next_page;
                    let count = users.len();
                    self.list.extend(users);
                    self.next_page += 1;
                    Transition::PageAppended { page, count }
                }
            }
            ServerMessage::UserUpdated(user) => {
                let id = user.id;
                let slot = self.list.iter_mut().find(|u| u.id == id);
                let found = slot.is_some();
                if let Some(slot) = slot {
                    *slot = user;
                }
                self.editing = None;
                Transition::RecordUpdated { id, found }
            }
            ServerMessage::Error(reason) => {
                if answered != Some(RequestKind::UpdateUser) {
                    self.is_loading = false;
                }
                self.last_error = Some(reason.clone());
                Transition::Failed(reason)
            }
        };

        self.touch();

        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_user(id: UserID) -> UserRecord {
        UserRecord {
            id,
            full_name: format!("User {id}"),
            post: "Analyst".to_string(),
            address: "Somewhere".to_string(),
            age: 25,
            salary: 500.0,
            has_tax_id: None,
            tax_id: None,
        }
    }

    fn page(ids: std::ops::Range<UserID>) -> ServerMessage {
        ServerMessage::Users(ids.map(make_user).collect())
    }

    fn requested_page(msg: Option<ClientMessage>) -> u64 {
        match msg {
            Some(ClientMessage::GetUsers(r)) => r.start,
            other => panic!("Expected getUsers, got {other:?}"),
        }
    }

    fn open_state() -> PaginationState {
        let mut state = PaginationState::new();
        state.on_open();
        state
    }

    #[test]
    fn no_requests_before_open() {
        let mut state = PaginationState::new();
        assert!(state.request_next_page_if_needed().is_none());
        assert!(!state.is_loading());
    }

    #[test]
    fn no_overlapping_requests() {
        let mut state = open_state();

        assert_eq!(requested_page(state.request_next_page_if_needed()), 0);
        assert!(state.is_loading());

        assert!(state.request_next_page_if_needed().is_none());
        let bottom = ScrollSample {
            scroll_top: 900.0,
            viewport_height: 100.0,
            content_height: 1000.0,
        };
        assert!(state.on_scroll(bottom).is_none());

        state.handle_message(page(0..15));
        assert!(!state.is_loading());
        assert_eq!(requested_page(state.on_scroll(bottom)), 1);
    }

    #[test]
    fn sixteen_records() {
        let mut state = open_state();

        state.request_next_page_if_needed();
        assert_eq!(
            state.handle_message(page(0..15)),
            Transition::PageAppended { page: 0, count: 15 }
        );

        assert_eq!(requested_page(state.request_next_page_if_needed()), 1);
        state.handle_message(page(15..16));

        assert_eq!(requested_page(state.request_next_page_if_needed()), 2);
        assert_eq!(
            state.handle_message(ServerMessage::Users(vec![])),
            Transition::ReachedEnd
        );

        assert!(state.loaded_all());
        assert_eq!(state.list().len(), 16);
        assert_eq!(state.next_page(), 2);

        // nothing more, however hard the user scrolls
        let bottom = ScrollSample {
            scroll_top: 10_000.0,
            viewport_height: 100.0,
            content_height: 100.0,
        };
        assert!(state.on_scroll(bottom).is_none());
        assert!(state.request_next_page_if_needed().is_none());
    }

    #[test]
    fn pages_keep_arrival_order() {
        let mut state = open_state();

        state.request_next_page_if_needed();
        state.handle_message(ServerMessage::Users(
            [5, 3, 9].into_iter().map(make_user).collect(),
        ));
        state.request_next_page_if_needed();
        state.handle_message(ServerMessage::Users(
            [1, 2].into_iter().map(make_user).collect(),
        ));

        let ids: Vec<_> = state.list().iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![5, 3, 9, 1, 2]);
    }

    #[test]
    fn error_allows_retry_of_same_page() {
        let mut state = open_state();

        state.request_next_page_if_needed();
        state.handle_message(page(0..15));
        state.request_next_page_if_needed();

        let t = state.handle_message(ServerMessage::Error("Database error".into()));
        assert_eq!(t, Transition::Failed("Database error".into()));

        assert!(!state.is_loading());
        assert!(!state.loaded_all());
        assert_eq!(state.list().len(), 15);
        assert_eq!(state.view().last_error.as_deref(), Some("Database error"));

        assert_eq!(requested_page(state.request_next_page_if_needed()), 1);
    }

    #[test]
    fn save_error_keeps_page_load_outstanding() {
        let mut state = open_state();
        state.request_next_page_if_needed();
        state.handle_message(page(0..15));

        assert!(state.on_row_activate(4));
        let edit = UserEdit::from(state.editing().unwrap());
        assert!(state.on_save_edit(edit).is_some());
        assert_eq!(requested_page(state.request_next_page_if_needed()), 1);

        // the save is answered first, while page 1 is still in flight
        let reason = "Required field taxId is missing";
        state.handle_message(ServerMessage::Error(reason.into()));
        assert!(state.is_loading());
        assert_eq!(state.view().last_error.as_deref(), Some(reason));
        assert!(state.editing().is_some());
        assert!(state.request_next_page_if_needed().is_none());

        state.handle_message(page(15..30));
        assert!(!state.is_loading());
        assert_eq!(state.next_page(), 2);
        assert_eq!(requested_page(state.request_next_page_if_needed()), 2);

        let ids: Vec<_> = state.list().iter().map(|u| u.id).collect();
        assert_eq!(ids, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn page_error_after_save_reply() {
        let mut state = open_state();
        state.request_next_page_if_needed();
        state.handle_message(page(0..5));

        state.on_row_activate(2);
        let edit = UserEdit::from(state.editing().unwrap());
        state.on_save_edit(edit);
        state.request_next_page_if_needed();

        let mut confirmed = make_user(2);
        confirmed.full_name = "Saved".into();
        state.handle_message(ServerMessage::UserUpdated(confirmed));
        assert!(state.is_loading());

        state.handle_message(ServerMessage::Error("Database error".into()));
        assert!(!state.is_loading());
        assert_eq!(requested_page(state.request_next_page_if_needed()), 1);
    }

    #[test]
    fn non_finite_salary_is_refused() {
        let mut state = open_state();
        state.request_next_page_if_needed();
        state.handle_message(page(0..3));
        state.on_row_activate(1);

        for salary in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut edit = UserEdit::from(state.editing().unwrap());
            edit.salary = salary;
            assert!(state.on_save_edit(edit).is_none());
        }

        assert_eq!(
            state.view().last_error.as_deref(),
            Some("Salary must be a finite number")
        );
        assert!(state.editing().is_some());

        // nothing was queued, so the next reply still answers a page request
        state.request_next_page_if_needed();
        state.handle_message(ServerMessage::Error("Database error".into()));
        assert!(!state.is_loading());
    }

    #[test]
    fn scroll_threshold() {
        let at = |scroll_top| ScrollSample {
            scroll_top,
            viewport_height: 300.0,
            content_height: 1000.0,
        };

        // bottom edge at 1000 - 300 / 3 = 900
        assert!(!at(500.0).near_bottom());
        assert!(!at(599.0).near_bottom());
        assert!(at(600.0).near_bottom());
        assert!(at(700.0).near_bottom());

        let mut state = open_state();
        assert!(state.on_scroll(at(100.0)).is_none());
        assert!(!state.is_loading());
        assert_eq!(requested_page(state.on_scroll(at(650.0))), 0);
    }

    #[test]
    fn edit_flow() {
        let mut state = open_state();
        state.request_next_page_if_needed();
        state.handle_message(page(0..10));

        assert!(!state.on_row_activate(42));
        assert!(state.on_row_activate(7));

        let mut edit = UserEdit::from(state.editing().unwrap());
        edit.full_name = "Renamed".into();
        edit.has_tax_id = false;
        edit.tax_id = Some(55);

        // the list is untouched until the server confirms
        let Some(ClientMessage::UpdateUser(request)) = state.on_save_edit(edit)
        else {
            panic!("Expected updateUser");
        };
        assert_eq!(request.id, 7);
        assert_eq!(request.tax_id, None);
        assert_eq!(state.list()[7].full_name, "User 7");
        assert!(state.editing().is_some());

        let mut confirmed = make_user(7);
        confirmed.full_name = "Renamed".into();
        confirmed.has_tax_id = Some(false);

        assert_eq!(
            state.handle_message(ServerMessage::UserUpdated(confirmed.clone())),
            Transition::RecordUpdated { id: 7, found: true }
        );
        assert_eq!(state.list()[7], confirmed);
        assert_eq!(state.list().len(), 10);
        assert!(state.editing().is_none());
    }

    #[test]
    fn cancel_sends_nothing() {
        let mut state = open_state();
        state.request_next_page_if_needed();
        state.handle_message(page(0..3));

        assert!(state.on_row_activate(1));
        state.on_cancel_edit();
        assert!(state.editing().is_none());

        let edit = UserEdit::from(&make_user(1));
        assert!(state.on_save_edit(edit).is_none());
    }

    #[test]
    fn close_discards_everything() {
        let mut state = open_state();
        state.request_next_page_if_needed();
        state.handle_message(page(0..15));
        state.request_next_page_if_needed();
        state.on_row_activate(3);

        let before = state.revision();
        state.on_close();

        assert!(state.revision() > before);
        let view = state.view();
        assert!(!view.connected);
        assert!(view.list.is_empty());
        assert!(!view.is_loading);
        assert!(view.editing.is_none());
        assert_eq!(state.next_page(), 0);

        assert!(state.request_next_page_if_needed().is_none());

        state.on_open();
        assert_eq!(requested_page(state.request_next_page_if_needed()), 0);
    }
}
