use leptos::ev;
use leptos::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::HtmlInputElement;

use crate::markdown::render_reply;
use crate::models::{Message, MessageKind, Role};
use crate::state::AppState;

/// Main chat area with message history, loading indicator, and input.
#[component]
pub fn ChatArea() -> impl IntoView {
    let state = expect_context::<AppState>();

    // Release previews if the view goes away mid-conversation.
    on_cleanup(move || state.new_conversation());

    // Keep the newest message in view.
    let container = NodeRef::<leptos::html::Div>::new();
    Effect::new(move |_| {
        state.session.with(|s| s.messages().len());
        state.is_loading();
        if let Some(el) = container.get() {
            el.set_scroll_top(el.scroll_height());
        }
    });

    view! {
        <main class="chat-area">
            // Error banner
            {move || {
                state.error.get().map(|err| {
                    view! {
                        <div class="error-banner">{err}</div>
                    }
                })
            }}

            // Messages
            <div class="messages-container" node_ref=container>
                {move || {
                    if state.messages().is_empty() && !state.is_loading() {
                        view! {
                            <div class="empty-state">
                                "Describe a repair problem or attach a photo to get started"
                            </div>
                        }.into_any()
                    } else {
                        view! {
                            <For
                                each=move || state.messages()
                                key=|m| m.id
                                let:msg
                            >
                                <MessageBubble message=msg />
                            </For>
                            // Pending assistant reply
                            {move || {
                                state.is_loading().then(|| {
                                    view! {
                                        <div class="message assistant">
                                            <div class="role-label">"assistant"</div>
                                            <div class="thinking">"Thinking…"</div>
                                        </div>
                                    }
                                })
                            }}
                        }.into_any()
                    }
                }}
            </div>

            // Input area
            <ChatInput />
        </main>
    }
}

/// A single chat message bubble.
#[component]
fn MessageBubble(message: Message) -> impl IntoView {
    let css_class = match (&message.kind, message.role) {
        (MessageKind::Error(_), _) => "message assistant error",
        (_, Role::User) => "message user",
        (_, Role::Assistant) => "message assistant",
    };
    let label = message.role.as_str();
    let body = match (&message.kind, message.role) {
        _ if message.content.is_empty() => None,
        (MessageKind::Error(_), _) => {
            Some(view! { <div>{format!("Error: {}", message.content)}</div> }.into_any())
        }
        (MessageKind::Text, Role::Assistant) => {
            let html = render_reply(&message.content);
            Some(view! { <div class="markdown" inner_html=html></div> }.into_any())
        }
        (MessageKind::Text, Role::User) => Some(view! { <div>{message.content}</div> }.into_any()),
    };

    view! {
        <div class=css_class>
            <div class="role-label">{label}</div>
            {message.image.map(|src| view! { <img class="message-image" src=src alt="Attached image" /> })}
            {body}
        </div>
    }
}

/// Chat input form with textarea, image picker, and send/stop button.
#[component]
fn ChatInput() -> impl IntoView {
    let state = expect_context::<AppState>();
    let (input, set_input) = signal(String::new());

    let is_sending = move || state.is_loading();
    let has_image = move || state.pending_image.with(|p| p.is_some());
    let can_send = move || !is_sending() && (!input.get().trim().is_empty() || has_image());

    let send = move || {
        if !can_send() {
            return;
        }
        if state.send_message(input.get_untracked()) {
            set_input.set(String::new());
        }
    };

    let on_keydown = move |ev: ev::KeyboardEvent| {
        if ev.key() == "Enter" && !ev.shift_key() {
            ev.prevent_default();
            send();
        }
    };

    let on_file = move |ev: web_sys::Event| {
        let Some(picker) = ev.target().and_then(|t| t.dyn_into::<HtmlInputElement>().ok()) else {
            return;
        };
        if let Some(file) = picker.files().and_then(|files| files.get(0)) {
            state.attach_file(file);
        }
        // Allow picking the same file again after removing it.
        picker.set_value("");
    };

    view! {
        <div class="input-area">
            {move || {
                state.pending_image.get().map(|image| {
                    view! {
                        <div class="attachment-preview">
                            {image.preview_url.map(|src| view! { <img src=src alt="Selected image" /> })}
                            <span>{image.file_name}</span>
                            <button class="remove-attachment" on:click=move |_| state.clear_attachment()>
                                "✕"
                            </button>
                        </div>
                    }
                })
            }}
            <div class="input-row">
                <label class="attach-btn">
                    "📎"
                    <input
                        type="file"
                        accept="image/*"
                        style="display:none"
                        on:change=on_file
                        disabled=is_sending
                    />
                </label>
                <textarea
                    rows="1"
                    placeholder="Describe the problem… (Enter to send, Shift+Enter for newline)"
                    prop:value=input
                    on:input=move |ev| {
                        set_input.set(event_target_value(&ev));
                    }
                    on:keydown=on_keydown
                    disabled=is_sending
                />
                {move || {
                    if is_sending() {
                        view! {
                            <button class="stop-btn" on:click=move |_| state.stop()>
                                "Stop"
                            </button>
                        }.into_any()
                    } else {
                        view! {
                            <button
                                class="send-btn"
                                on:click=move |_| send()
                                disabled=move || !can_send()
                            >
                                "Send"
                            </button>
                        }.into_any()
                    }
                }}
            </div>
        </div>
    }
}
