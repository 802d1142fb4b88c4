use leptos::prelude::*;

use crate::state::AppState;

/// Top bar with the assistant's name and a "New conversation" button.
#[component]
pub fn Header() -> impl IntoView {
    let state = expect_context::<AppState>();

    let on_new = move |_| state.new_conversation();

    view! {
        <header class="chat-header">
            <h2>"Home Repair Assistant"</h2>
            <button
                class="new-chat-btn"
                on:click=on_new
                disabled=move || state.messages().is_empty() && !state.is_loading()
            >
                "+ New conversation"
            </button>
        </header>
    }
}
