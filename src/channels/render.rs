//! Turns prompt keys into text in the user's language.
//!
//! Every key has an English entry; Hindi and Nepali entries cover the
//! conversational keys and fall back to English for the rest. An unknown key
//! renders as itself so a missing entry is visible rather than silent.

use crate::engine::Prompt;
use crate::session::Language;

/// A prompt ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    /// (option id, label)
    pub buttons: Vec<(String, String)>,
    pub request_location: bool,
}

const ENGLISH: &[(&str, &str)] = &[
    ("greeting", "Namaste! I am Sajilo Sewak, your assistant for Government of Sikkim services."),
    ("menu.main", "How can I help you today?"),
    ("menu.language", "Please choose your language / कृपया अपनी भाषा चुनें / कृपया आफ्नो भाषा छान्नुहोस्"),
    ("menu.ex_gratia", "Apply for ex-gratia"),
    ("menu.check_status", "Check application status"),
    ("menu.relief_norms", "Ex-gratia norms"),
    ("menu.complaint", "File a complaint"),
    ("menu.operator_search", "Find a CSC operator"),
    ("menu.tourism", "Find a homestay"),
    ("menu.emergency", "Emergency services"),
    ("menu.feedback", "Give feedback"),
    ("menu.unknown", "Sorry, I did not understand that. Please choose one of the options below."),
    ("menu.nothing_to_cancel", "There is nothing to cancel right now."),
    ("language.english", "English"),
    ("language.hindi", "हिन्दी"),
    ("language.nepali", "नेपाली"),
    ("language.set", "Language updated."),
    ("location.unexpected", "Thanks, but I was not expecting a location just now."),
    ("error.generic", "Something went wrong on our side. Please try again."),
    ("form_name.ex_gratia_application", "ex-gratia application"),
    ("form_name.complaint", "complaint"),
    ("form_name.feedback", "feedback"),
    ("form_name.operator_search", "CSC operator search"),
    ("form_name.homestay_search", "homestay search"),
    ("form_name.status_check", "status check"),
    (
        "form.ex_gratia_application.intro",
        "Let's start your ex-gratia application. Type 'cancel' at any time to stop.",
    ),
    ("form.complaint.intro", "Let's register your complaint. Type 'cancel' at any time to stop."),
    ("form.feedback.intro", "We would love to hear from you."),
    ("form.operator_search.intro", "I will find the Common Service Centre operator for your area."),
    ("form.homestay_search.intro", "I will find registered homestays for you."),
    ("form.status_check.intro", "Let's check the status of your application."),
    ("form.cancelled", "Cancelled. Nothing has been submitted."),
    (
        "form.aborted_question",
        "It looks like you have a question, so I have stopped the form. This may help:",
    ),
    ("form.summary", "Please review your {form}:"),
    ("form.edit_menu", "Which detail would you like to change?"),
    ("form.no_active_application", "There is no application in progress."),
    ("form.expired", "Your {form} was cancelled after a long period of inactivity. You can start again any time."),
    ("ask.name", "Please enter your full name."),
    ("ask.father_name", "Please enter your father's name."),
    ("ask.village", "Which village do you live in?"),
    ("ask.contact_number", "Please enter your 10-digit mobile number."),
    ("ask.voter_id", "Please enter your voter ID number."),
    ("ask.ward", "Please enter your ward number (up to {max_digits} digits)."),
    ("ask.gpu", "Please enter your Gram Panchayat Unit (GPU)."),
    ("ask.district", "Please select your district."),
    ("ask.khatiyan_no", "Please enter the khatiyan number of the land (up to {max_digits} digits)."),
    ("ask.plot_no", "Please enter the plot number(s) of the land."),
    ("ask.nc_datetime", "When did the disaster happen? Please use DD/MM/YYYY HH:MM."),
    ("ask.damage_type", "What kind of damage did you suffer?"),
    ("ask.house_damage_extent", "Was the house fully or partially damaged?"),
    ("ask.crop_area", "How much crop area was affected?"),
    ("ask.livestock_count", "How many animals were lost?"),
    ("ask.damage_description", "Please describe the damage (at least {min} characters)."),
    ("ask.location", "Please share the location of the damage using the button below, or choose Skip."),
    ("ask.complaint_description", "Please describe your complaint (at least {min} characters)."),
    ("ask.feedback_message", "Please type your feedback."),
    ("ask.operator_query", "Please enter your GPU or block name."),
    ("ask.homestay_place", "Which place are you planning to visit?"),
    ("ask.reference", "Please enter your application reference number."),
    ("field.name", "Name"),
    ("field.father_name", "Father's name"),
    ("field.village", "Village"),
    ("field.contact_number", "Contact number"),
    ("field.voter_id", "Voter ID"),
    ("field.ward", "Ward"),
    ("field.gpu", "GPU"),
    ("field.district", "District"),
    ("field.khatiyan_no", "Khatiyan no."),
    ("field.plot_no", "Plot no."),
    ("field.nc_datetime", "Date and time of disaster"),
    ("field.damage_type", "Type of damage"),
    ("field.house_damage_extent", "Extent of house damage"),
    ("field.crop_area", "Crop area affected"),
    ("field.livestock_count", "Animals lost"),
    ("field.damage_description", "Description"),
    ("field.location", "Location"),
    ("field.complaint_description", "Complaint"),
    ("field.message", "Message"),
    ("damage.house", "House damage"),
    ("damage.crop", "Crop loss"),
    ("damage.livestock", "Livestock loss"),
    ("district.east", "East Sikkim"),
    ("district.west", "West Sikkim"),
    ("district.north", "North Sikkim"),
    ("district.south", "South Sikkim"),
    ("extent.full", "Fully damaged"),
    ("extent.partial", "Partially damaged"),
    ("option.confirm", "Confirm"),
    ("option.retry", "Try again"),
    ("option.edit", "Edit"),
    ("option.cancel", "Cancel"),
    ("option.skip", "Skip"),
    ("option.done", "Done"),
    ("invalid.empty", "Please enter a value."),
    ("invalid.too_short", "That is too short. Please enter at least {min} characters."),
    ("invalid.phone", "That does not look like a valid 10-digit mobile number."),
    ("invalid.choice", "Please select one of the options."),
    ("invalid.typed_answer", "Please type your answer for this question."),
    ("invalid.number", "Please enter a number."),
    ("invalid.too_many_digits", "Please enter a number with at most {max} digits."),
    ("invalid.datetime", "I could not read that date. Please use DD/MM/YYYY HH:MM, for example 20/07/2025 14:30."),
    ("invalid.coordinates", "That location is not valid."),
    ("invalid.location", "Please share a location using the button, or choose Skip."),
    ("invalid.confirmation", "Please choose Confirm, Edit or Cancel."),
    ("submission.in_progress", "Your application is being submitted. Please wait."),
    (
        "submission.failed",
        "We could not submit your application. Your details are safe; choose Try again to resubmit.",
    ),
    ("submission.success", "Your application has been submitted. Reference number: {reference} (status: {status})."),
    ("submission.saved", "Your application has been recorded. Reference number: {reference}."),
    ("record.saved", "Your {form} has been recorded. Reference number: {reference}."),
    ("lookup.none", "Sorry, nothing was found for \"{query}\"."),
    ("lookup.operators", "CSC operator"),
    ("lookup.homestays", "Homestay"),
    ("column.name", "Name"),
    ("column.gpu", "GPU"),
    ("column.block", "Block"),
    ("column.district", "District"),
    ("column.contact", "Contact"),
    ("column.place", "Place"),
    ("column.rating", "Rating"),
    ("column.price_per_night", "Price per night (₹)"),
    ("status.found", "Application {reference}: {status}"),
    ("status.not_found", "No application found with reference {reference}."),
    ("info.help", "Type 'menu' at any time to see what I can help with."),
    ("info.complaint", "Complaints are forwarded to the district administration. Type 'menu' to file one."),
    ("info.csc", "Common Service Centres help with certificates and online applications in every GPU."),
    ("info.tourism", "Registered homestays can be found by place name, for example Pelling or Lachung."),
    ("info.status", "Reference numbers are shown when you submit an application, for example EXG20250720-3FA91C."),
    (
        "info.relief_norms",
        "Ex-gratia assistance norms:\n\
         House: complete damage ₹2,00,000; partial damage ₹50,000 to ₹1,00,000\n\
         Crops: complete loss ₹25,000 to ₹50,000; partial loss ₹10,000 to ₹25,000\n\
         Livestock: large animals ₹15,000 to ₹25,000; small animals ₹5,000 to ₹10,000\n\
         Death due to disaster: ₹4,00,000",
    ),
    ("info.emergency", "Emergency numbers:"),
];

const HINDI: &[(&str, &str)] = &[
    ("greeting", "नमस्ते! मैं सजिलो सेवक हूँ, सिक्किम सरकार की सेवाओं के लिए आपका सहायक।"),
    ("menu.main", "मैं आज आपकी क्या मदद कर सकता हूँ?"),
    ("menu.ex_gratia", "एक्स-ग्रेशिया के लिए आवेदन"),
    ("menu.check_status", "आवेदन की स्थिति देखें"),
    ("menu.relief_norms", "एक्स-ग्रेशिया नियम"),
    ("menu.complaint", "शिकायत दर्ज करें"),
    ("menu.operator_search", "CSC ऑपरेटर खोजें"),
    ("menu.tourism", "होमस्टे खोजें"),
    ("menu.emergency", "आपातकालीन सेवाएँ"),
    ("menu.feedback", "सुझाव दें"),
    ("menu.unknown", "क्षमा करें, मैं समझ नहीं पाया। कृपया नीचे से एक विकल्प चुनें।"),
    ("menu.nothing_to_cancel", "अभी रद्द करने के लिए कुछ नहीं है।"),
    ("language.set", "भाषा बदल दी गई है।"),
    ("error.generic", "कुछ गलत हो गया। कृपया फिर से प्रयास करें।"),
    ("form.cancelled", "रद्द कर दिया गया। कुछ भी जमा नहीं किया गया है।"),
    ("form.aborted_question", "लगता है आपका कोई प्रश्न है, इसलिए फ़ॉर्म रोक दिया गया है। यह जानकारी मदद कर सकती है:"),
    ("form.summary", "कृपया अपने {form} की जाँच करें:"),
    ("form.no_active_application", "कोई आवेदन जारी नहीं है।"),
    ("ask.name", "कृपया अपना पूरा नाम लिखें।"),
    ("ask.father_name", "कृपया अपने पिता का नाम लिखें।"),
    ("ask.village", "आप किस गाँव में रहते हैं?"),
    ("ask.contact_number", "कृपया अपना 10 अंकों का मोबाइल नंबर लिखें।"),
    ("ask.damage_type", "आपको किस प्रकार का नुकसान हुआ?"),
    ("ask.location", "कृपया नीचे दिए बटन से नुकसान का स्थान भेजें, या छोड़ें चुनें।"),
    ("option.confirm", "पुष्टि करें"),
    ("option.retry", "फिर से प्रयास करें"),
    ("option.edit", "बदलें"),
    ("option.cancel", "रद्द करें"),
    ("option.skip", "छोड़ें"),
    ("option.done", "हो गया"),
    ("invalid.phone", "यह मान्य 10 अंकों का मोबाइल नंबर नहीं लगता।"),
    ("invalid.choice", "कृपया दिए गए विकल्पों में से एक चुनें।"),
    ("invalid.typed_answer", "कृपया इस प्रश्न का उत्तर टाइप करें।"),
    ("submission.failed", "आवेदन जमा नहीं हो सका। आपकी जानकारी सुरक्षित है; फिर से प्रयास करें चुनें।"),
    ("submission.success", "आपका आवेदन जमा हो गया है। संदर्भ संख्या: {reference} (स्थिति: {status})।"),
    ("record.saved", "आपका {form} दर्ज कर लिया गया है। संदर्भ संख्या: {reference}।"),
    ("status.found", "आवेदन {reference}: {status}"),
    ("status.not_found", "संदर्भ संख्या {reference} का कोई आवेदन नहीं मिला।"),
    ("info.emergency", "आपातकालीन नंबर:"),
];

const NEPALI: &[(&str, &str)] = &[
    ("greeting", "नमस्ते! म सजिलो सेवक हुँ, सिक्किम सरकारका सेवाहरूका लागि तपाईंको सहायक।"),
    ("menu.main", "आज म तपाईंलाई कसरी मद्दत गर्न सक्छु?"),
    ("menu.ex_gratia", "एक्स-ग्रेसियाको लागि आवेदन"),
    ("menu.check_status", "आवेदनको अवस्था हेर्नुहोस्"),
    ("menu.relief_norms", "एक्स-ग्रेसिया नियमहरू"),
    ("menu.complaint", "गुनासो दर्ता गर्नुहोस्"),
    ("menu.operator_search", "CSC अपरेटर खोज्नुहोस्"),
    ("menu.tourism", "होमस्टे खोज्नुहोस्"),
    ("menu.emergency", "आपतकालीन सेवाहरू"),
    ("menu.feedback", "सुझाव दिनुहोस्"),
    ("menu.unknown", "माफ गर्नुहोस्, मैले बुझिनँ। कृपया तलको विकल्प छान्नुहोस्।"),
    ("menu.nothing_to_cancel", "अहिले रद्द गर्नुपर्ने केही छैन।"),
    ("language.set", "भाषा परिवर्तन गरियो।"),
    ("error.generic", "केही गडबड भयो। कृपया फेरि प्रयास गर्नुहोस्।"),
    ("form.cancelled", "रद्द गरियो। केही पनि पेश गरिएको छैन।"),
    ("form.aborted_question", "तपाईंको प्रश्न छ जस्तो लाग्छ, त्यसैले फारम रोकिएको छ। यो जानकारीले मद्दत गर्न सक्छ:"),
    ("form.summary", "कृपया आफ्नो {form} जाँच गर्नुहोस्:"),
    ("form.no_active_application", "कुनै आवेदन जारी छैन।"),
    ("ask.name", "कृपया आफ्नो पूरा नाम लेख्नुहोस्।"),
    ("ask.father_name", "कृपया बुबाको नाम लेख्नुहोस्।"),
    ("ask.village", "तपाईं कुन गाउँमा बस्नुहुन्छ?"),
    ("ask.contact_number", "कृपया आफ्नो १० अंकको मोबाइल नम्बर लेख्नुहोस्।"),
    ("ask.damage_type", "तपाईंलाई कस्तो क्षति भयो?"),
    ("ask.location", "कृपया तलको बटनबाट क्षतिको स्थान पठाउनुहोस्, वा छोड्नुहोस् छान्नुहोस्।"),
    ("option.confirm", "पुष्टि गर्नुहोस्"),
    ("option.retry", "फेरि प्रयास गर्नुहोस्"),
    ("option.edit", "परिवर्तन"),
    ("option.cancel", "रद्द गर्नुहोस्"),
    ("option.skip", "छोड्नुहोस्"),
    ("option.done", "भयो"),
    ("invalid.phone", "यो मान्य १० अंकको मोबाइल नम्बर जस्तो देखिँदैन।"),
    ("invalid.choice", "कृपया दिइएका विकल्पमध्ये एउटा छान्नुहोस्।"),
    ("invalid.typed_answer", "कृपया यो प्रश्नको उत्तर टाइप गर्नुहोस्।"),
    ("submission.failed", "आवेदन पेश हुन सकेन। तपाईंको विवरण सुरक्षित छ; फेरि प्रयास गर्नुहोस् छान्नुहोस्।"),
    ("submission.success", "तपाईंको आवेदन पेश भयो। सन्दर्भ नम्बर: {reference} (अवस्था: {status})।"),
    ("record.saved", "तपाईंको {form} दर्ता भयो। सन्दर्भ नम्बर: {reference}।"),
    ("status.found", "आवेदन {reference}: {status}"),
    ("status.not_found", "सन्दर्भ नम्बर {reference} को कुनै आवेदन भेटिएन।"),
    ("info.emergency", "आपतकालीन नम्बरहरू:"),
];

fn catalog(language: Language) -> &'static [(&'static str, &'static str)] {
    match language {
        Language::English => ENGLISH,
        Language::Hindi => HINDI,
        Language::Nepali => NEPALI,
    }
}

fn find(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Entry for `key` in `language`, else English.
pub fn lookup(language: Language, key: &str) -> Option<&'static str> {
    find(catalog(language), key).or_else(|| find(ENGLISH, key))
}

/// Like [`lookup`], but an unknown key renders as itself.
pub fn text(language: Language, key: &str) -> String {
    lookup(language, key).unwrap_or(key).to_string()
}

fn fill(template: &str, params: &[(String, String)]) -> String {
    params.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// Param values that are themselves message keys get translated.
fn value_text(language: Language, name: &str, value: &str) -> String {
    if name == "form" {
        return text(language, &format!("form_name.{value}"));
    }
    lookup(language, value).map_or_else(|| value.to_string(), str::to_string)
}

fn labelled_lines(language: Language, label_prefix: &str, params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(name, value)| {
            let label = lookup(language, &format!("{label_prefix}{name}")).unwrap_or(name.as_str());
            format!("{label}: {}", value_text(language, name, value))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render(language: Language, prompt: &Prompt) -> RenderedMessage {
    let message = match prompt.key.as_str() {
        "form.summary" => {
            let (head, fields): (Vec<_>, Vec<_>) = prompt.params.iter().cloned().partition(|(n, _)| n == "form");
            let header = fill(&text(language, "form.summary"), &translated(language, &head));
            format!("{header}\n\n{}", labelled_lines(language, "field.", &fields))
        }
        "lookup.result" => {
            let table = prompt.param("table").unwrap_or_default();
            let columns: Vec<(String, String)> =
                prompt.params.iter().filter(|(n, _)| n != "table").cloned().collect();
            let body = labelled_lines(language, "column.", &columns);
            match lookup(language, &format!("lookup.{table}")) {
                Some(title) => format!("{title}\n{body}"),
                None => body,
            }
        }
        "info.emergency" => {
            let lines = prompt
                .params
                .iter()
                .map(|(service, number)| format!("{service}: {number}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}\n{lines}", text(language, "info.emergency"))
        }
        key => fill(&text(language, key), &translated(language, &prompt.params)),
    };

    RenderedMessage {
        text: message,
        buttons: prompt
            .options
            .iter()
            .map(|o| (o.id.clone(), text(language, &o.label)))
            .collect(),
        request_location: prompt.request_location,
    }
}

fn translated(language: Language, params: &[(String, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(name, value)| (name.clone(), value_text(language, name, value)))
        .collect()
}
