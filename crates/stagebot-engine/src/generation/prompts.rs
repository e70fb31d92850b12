pub const EMPTY_ROOM_INSTRUCTIONS: &str = "IMAGE EDITING TASK (STRICT):\n\
Create a photorealistic image of this room but completely EMPTY.\n\
ACTIONS:\n\
1. REMOVE ALL furniture, rugs, decor, and lighting.\n\
2. REMOVE ALL window treatments (curtains, blinds). Show bare windows.\n\
3. KEEP the original floor, walls, ceiling, and windows EXACTLY as they are.\n\
4. IN-PAINT the removed areas seamlessly.\n\
OUTPUT RULE: Return ONLY the generated image.";

pub const FURNISH_INSTRUCTIONS: &str = "IMAGE GENERATION TASK (Virtual Staging):\n\
Furnish the empty room using the furniture styles shown in the Moodboard.\n\
\n\
<CRITICAL: STRUCTURAL PRESERVATION>\n\
1. CAMERA LOCK: Maintain the EXACT SAME camera angle, zoom, and perspective as the original image. Do NOT shift, crop, or rotate the view.\n\
2. GEOMETRY FREEZE: The structural lines (corners, windows, ceiling, floor) MUST remain pixel-perfectly aligned with the original.\n\
3. IN-PAINTING ONLY: Only remove furniture and fill in the background. Do NOT redesign the room architecture.\n\
\n\
<CRITICAL: DIMENSION & SCALE RULES>\n\
1. READ TEXT: You MUST read the names written on the moodboard (e.g., sofa, bed, light, chair).\n\
2. REALISTIC SCALING: Place the furniture in the room with accurate scale relative to the room's ceiling height (assume 2400mm ceiling).\n\
3. NO DISTORTION: Do not stretch or squash the furniture to fit the space. Keep the original proportions.\n\
\n\
<CRITICAL: DO NOT COPY PASTE>\n\
1. RE-ARRANGE: Do NOT copy the layout or composition of the moodboard. Place furniture into the room's 3D space anew.\n\
2. NO TEXT LABELS: IGNORE all text in the moodboard for rendering. Do NOT write any text in the final image.\n\
3. REMOVE BACKGROUND: Do NOT paste the white background of the moodboard. Only extract the furniture items.\n\
\n\
<LIGHTING INSTRUCTION: TURN ON ALL LIGHTS>\n\
1. ACTIVATE LIGHTING: Identify items labeled as 'pendant/floor/table/wall lighting'.\n\
2. STATE: All lighting fixtures MUST be TURNED ON.\n\
3. COLOR TEMPERATURE: Use 4000K White light.\n\
4. EMISSIVE MATERIAL: The light bulbs/shades must look bright and glowing (Emissive).\n\
5. AMBIENT GLOW: Ensure the lights cast a soft glow on the surrounding walls and floor.\n\
\n\
<MANDATORY WINDOW TREATMENT>\n\
- Install pure WHITE CHIFFON CURTAINS on all windows.\n\
- They must be SHEER (90% transparency), allowing natural light.\n\
\n\
<DESIGN INSTRUCTIONS>\n\
1. PERSPECTIVE MATCH: Align the furniture with the floor grid and vanishing points of the empty room.\n\
2. PLACEMENT: Realistic placement.\n\
OUTPUT RULE: Return ONLY the generated interior image. No text, no moodboard layout.";

pub const EMPTY_ROOM_LABEL: &str = "Background Empty Room:";
pub const REFERENCE_LABEL: &str = "Furniture Reference:";
