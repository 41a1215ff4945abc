use crate::types::{InboundEvent, MenuOption, OutboundMessage, UserRecord};

pub const OPT_SHOW_RECOMMENDATION: &str = "show_recommendation";
pub const OPT_GENERATE_RECOMMENDATION: &str = "generate_recommendation";
pub const OPT_CONTACT_SALES: &str = "contact_sales";
pub const OPT_CONTACT_SUPPORT: &str = "contact_support";
pub const OPT_MAIN_MENU: &str = "main_menu";
pub const OPT_END_CHAT: &str = "end_chat";

const ROW_SHOW: MenuOption = MenuOption {
    id: OPT_SHOW_RECOMMENDATION,
    title: "📄 Ver recomendación",
};
const ROW_GENERATE: MenuOption = MenuOption {
    id: OPT_GENERATE_RECOMMENDATION,
    title: "💡 Crear recomendación",
};
const ROW_SALES: MenuOption = MenuOption {
    id: OPT_CONTACT_SALES,
    title: "🤝 Hablar con Ventas",
};
const ROW_SUPPORT: MenuOption = MenuOption {
    id: OPT_CONTACT_SUPPORT,
    title: "⚙️ Pedir Soporte",
};
const ROW_MAIN_MENU: MenuOption = MenuOption {
    id: OPT_MAIN_MENU,
    title: "📋 Menú principal",
};
const ROW_END_CHAT: MenuOption = MenuOption {
    id: OPT_END_CHAT,
    title: "👋 Finalizar chat",
};

const REMINDER_TEXT: &str = "Seguimos en línea 😊 Aquí tienes el menú de nuevo:";
const FOLLOW_UP_TEXT: &str = "¿Puedo ayudarte con algo más?";
const END_CHAT_FAREWELL_TEXT: &str =
    "¡Gracias por escribirnos! 👋 Que tengas un excelente día.";
const IDLE_FAREWELL_TEXT: &str =
    "⏳ He cerrado nuestra conversación por inactividad. ¡Escríbeme cuando quieras retomarla!";
const GENERATE_TEXT: &str = "¡Claro! 💡 Genera tu recomendación personalizada en el siguiente enlace:\nwww.hostaddrees.com/#IA";
const NO_RECOMMENDATION_TEXT: &str = "Aún no encuentro una recomendación guardada para este número. 💡 Puedes crear la tuya en www.hostaddrees.com/#IA";
const SALES_TEXT: &str = "Para hablar con nuestro equipo de ventas, por favor usa este enlace: 🤝\nhttps://api.whatsapp.com/send/?phone=573223063648&text=Hola+Ventas+&type=phone_number&app_absent=0";
const SUPPORT_TEXT: &str = "Para recibir soporte técnico, por favor usa este enlace: ⚙️\nhttps://api.whatsapp.com/send/?phone=573223063648&text=Hola+Soporte+&type=phone_number&app_absent=0";

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub messages: Vec<OutboundMessage>,
    pub end_session: bool,
}

/// Pure decision step: session state + user record + inbound event in,
/// outbound messages + session transition out. No I/O.
pub fn decide(
    already_active: bool,
    user: &UserRecord,
    profile_name: &str,
    event: &InboundEvent,
) -> Decision {
    match event {
        InboundEvent::Text { .. } => {
            let opener = if already_active {
                OutboundMessage::Text {
                    body: REMINDER_TEXT.to_string(),
                }
            } else {
                OutboundMessage::Text {
                    body: welcome_text(user, profile_name),
                }
            };
            Decision {
                messages: vec![opener, main_menu(user)],
                end_session: false,
            }
        }
        InboundEvent::MenuSelection { id, .. } => match id.as_str() {
            OPT_SHOW_RECOMMENDATION => substantive(show_recommendation_text(user)),
            OPT_GENERATE_RECOMMENDATION => substantive(GENERATE_TEXT.to_string()),
            OPT_CONTACT_SALES => substantive(SALES_TEXT.to_string()),
            OPT_CONTACT_SUPPORT => substantive(SUPPORT_TEXT.to_string()),
            OPT_MAIN_MENU => Decision {
                messages: vec![main_menu(user)],
                end_session: false,
            },
            OPT_END_CHAT => Decision {
                messages: vec![OutboundMessage::Text {
                    body: END_CHAT_FAREWELL_TEXT.to_string(),
                }],
                end_session: true,
            },
            // never let an unknown selection crash or answer the handler
            _ => Decision {
                messages: Vec::new(),
                end_session: false,
            },
        },
    }
}

/// Farewell sent by the idle-expiry timer, distinct from the explicit
/// end-chat farewell.
pub fn idle_farewell() -> OutboundMessage {
    OutboundMessage::Text {
        body: IDLE_FAREWELL_TEXT.to_string(),
    }
}

/// The first row is the personalization contract: "show" only when a
/// recommendation exists, "generate" otherwise. The remaining rows are
/// always present in this order.
pub fn main_menu(user: &UserRecord) -> OutboundMessage {
    let first = if user.recommendation.is_some() {
        ROW_SHOW
    } else {
        ROW_GENERATE
    };
    let body = if user.recommendation.is_some() && !user.display_name.is_empty() {
        format!(
            "Veo que tienes una recomendación para *{}*.\n\nPor favor, selecciona una opción:",
            user.display_name
        )
    } else {
        "Por favor, selecciona una de las siguientes opciones:".to_string()
    };
    OutboundMessage::List {
        header: "Menú Principal",
        body,
        footer: "✨ Hostaddrees AsesorIA",
        button: "Ver Opciones ⚙️",
        section_title: "ACCIONES",
        rows: vec![first, ROW_SALES, ROW_SUPPORT, ROW_END_CHAT],
    }
}

fn substantive(body: String) -> Decision {
    Decision {
        messages: vec![
            OutboundMessage::Text { body },
            OutboundMessage::Buttons {
                body: FOLLOW_UP_TEXT.to_string(),
                buttons: vec![ROW_MAIN_MENU, ROW_END_CHAT],
            },
        ],
        end_session: false,
    }
}

fn welcome_text(user: &UserRecord, profile_name: &str) -> String {
    let name = if profile_name.trim().is_empty() {
        user.display_name.trim()
    } else {
        profile_name.trim()
    };
    if name.is_empty() {
        "👋 ¡Hola! Soy tu *AsesorIA* y te doy la bienvenida a *Hostaddrees*.".to_string()
    } else {
        format!("👋 ¡Hola, {name}! Soy tu *AsesorIA* y te doy la bienvenida a *Hostaddrees*.")
    }
}

fn show_recommendation_text(user: &UserRecord) -> String {
    match &user.recommendation {
        Some(text) if !user.display_name.is_empty() => format!(
            "📄 *Aquí tienes tu última recomendación para {}:*\n\n{}",
            user.display_name, text
        ),
        Some(text) => format!("📄 *Aquí tienes tu última recomendación:*\n\n{text}"),
        None => NO_RECOMMENDATION_TEXT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_without_recommendation() -> UserRecord {
        UserRecord::detached("3001234567", "")
    }

    fn user_with_recommendation() -> UserRecord {
        let mut user = UserRecord::detached("3001234567", "Panadería El Trigal");
        user.recommendation = Some("Usa un dominio .co y un plan de hosting básico.".to_string());
        user
    }

    fn text_event() -> InboundEvent {
        InboundEvent::Text {
            body: "hola".to_string(),
        }
    }

    fn selection(id: &str) -> InboundEvent {
        InboundEvent::MenuSelection {
            id: id.to_string(),
            title: String::new(),
        }
    }

    fn menu_row_ids(message: &OutboundMessage) -> Vec<&'static str> {
        match message {
            OutboundMessage::List { rows, .. } => rows.iter().map(|r| r.id).collect(),
            other => panic!("expected a list menu, got {other:?}"),
        }
    }

    #[test]
    fn first_text_message_gets_welcome_then_menu() {
        let decision = decide(false, &user_without_recommendation(), "Carlos", &text_event());
        assert_eq!(decision.messages.len(), 2);
        assert!(!decision.end_session);
        match &decision.messages[0] {
            OutboundMessage::Text { body } => {
                assert!(body.contains("Carlos"));
                assert!(body.contains("bienvenida"));
            }
            other => panic!("expected welcome text, got {other:?}"),
        }
        assert!(matches!(decision.messages[1], OutboundMessage::List { .. }));
    }

    #[test]
    fn second_text_message_in_window_gets_reminder_not_welcome() {
        let decision = decide(true, &user_without_recommendation(), "Carlos", &text_event());
        assert_eq!(decision.messages.len(), 2);
        match &decision.messages[0] {
            OutboundMessage::Text { body } => {
                assert!(!body.contains("bienvenida"));
                assert!(!body.contains("Carlos"));
            }
            other => panic!("expected reminder text, got {other:?}"),
        }
        assert!(matches!(decision.messages[1], OutboundMessage::List { .. }));
    }

    #[test]
    fn welcome_falls_back_to_stored_display_name() {
        let user = UserRecord::detached("3001234567", "Panadería El Trigal");
        let decision = decide(false, &user, "", &text_event());
        match &decision.messages[0] {
            OutboundMessage::Text { body } => assert!(body.contains("Panadería El Trigal")),
            other => panic!("expected welcome text, got {other:?}"),
        }
    }

    #[test]
    fn menu_offers_generate_when_no_recommendation_stored() {
        let ids = menu_row_ids(&main_menu(&user_without_recommendation()));
        assert_eq!(
            ids,
            vec![
                OPT_GENERATE_RECOMMENDATION,
                OPT_CONTACT_SALES,
                OPT_CONTACT_SUPPORT,
                OPT_END_CHAT,
            ]
        );
    }

    #[test]
    fn menu_offers_show_when_recommendation_stored() {
        let ids = menu_row_ids(&main_menu(&user_with_recommendation()));
        assert_eq!(
            ids,
            vec![
                OPT_SHOW_RECOMMENDATION,
                OPT_CONTACT_SALES,
                OPT_CONTACT_SUPPORT,
                OPT_END_CHAT,
            ]
        );
    }

    #[test]
    fn show_recommendation_replays_the_stored_text() {
        let user = user_with_recommendation();
        let decision = decide(true, &user, "", &selection(OPT_SHOW_RECOMMENDATION));
        match &decision.messages[0] {
            OutboundMessage::Text { body } => {
                assert!(body.contains("Usa un dominio .co"));
                assert!(body.contains("Panadería El Trigal"));
            }
            other => panic!("expected recommendation text, got {other:?}"),
        }
    }

    #[test]
    fn show_recommendation_without_stored_text_says_none_found() {
        let decision = decide(
            true,
            &user_without_recommendation(),
            "",
            &selection(OPT_SHOW_RECOMMENDATION),
        );
        match &decision.messages[0] {
            OutboundMessage::Text { body } => assert!(body.contains("Aún no encuentro")),
            other => panic!("expected none-found text, got {other:?}"),
        }
    }

    #[test]
    fn substantive_selections_get_a_follow_up_prompt() {
        for id in [
            OPT_SHOW_RECOMMENDATION,
            OPT_GENERATE_RECOMMENDATION,
            OPT_CONTACT_SALES,
            OPT_CONTACT_SUPPORT,
        ] {
            let decision = decide(true, &user_with_recommendation(), "", &selection(id));
            assert_eq!(decision.messages.len(), 2, "selection {id}");
            assert!(!decision.end_session, "selection {id}");
            match &decision.messages[1] {
                OutboundMessage::Buttons { buttons, .. } => {
                    let ids = buttons.iter().map(|b| b.id).collect::<Vec<_>>();
                    assert_eq!(ids, vec![OPT_MAIN_MENU, OPT_END_CHAT], "selection {id}");
                }
                other => panic!("expected follow-up buttons for {id}, got {other:?}"),
            }
        }
    }

    #[test]
    fn main_menu_selection_has_no_follow_up() {
        let decision = decide(true, &user_with_recommendation(), "", &selection(OPT_MAIN_MENU));
        assert_eq!(decision.messages.len(), 1);
        assert!(matches!(decision.messages[0], OutboundMessage::List { .. }));
        assert!(!decision.end_session);
    }

    #[test]
    fn end_chat_sends_only_a_farewell_and_ends_the_session() {
        let decision = decide(true, &user_with_recommendation(), "", &selection(OPT_END_CHAT));
        assert_eq!(decision.messages.len(), 1);
        assert!(decision.end_session);
        match &decision.messages[0] {
            OutboundMessage::Text { body } => assert!(body.contains("Gracias por escribirnos")),
            other => panic!("expected farewell text, got {other:?}"),
        }
    }

    #[test]
    fn idle_farewell_differs_from_end_chat_farewell() {
        let idle = idle_farewell();
        let explicit = decide(true, &user_with_recommendation(), "", &selection(OPT_END_CHAT));
        assert_ne!(Some(&idle), explicit.messages.first());
    }

    #[test]
    fn unknown_selection_is_answered_with_silence() {
        let decision = decide(
            true,
            &user_with_recommendation(),
            "",
            &selection("option_that_never_existed"),
        );
        assert!(decision.messages.is_empty());
        assert!(!decision.end_session);
    }
}
